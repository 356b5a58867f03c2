use std::borrow::Cow;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::title::Title;

static TEMPLATE_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:g<([A-Za-z_][A-Za-z0-9_]*|\d+)>|([1-9]\d?)|([ntrfva\\]))|\$").unwrap()
});

/// One rewrite as written in a job description.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TransformRule {
    pub pattern: String,
    #[serde(alias = "repl")]
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    regex: Regex,
    replacement: String,
}

impl CompiledRule {
    /// Replacements are Python `re.sub` templates: `\1`, `\g<name>` and
    /// `\g<0>` reference groups, `\n`, `\t` and `\\` are escapes, and `$` is
    /// an ordinary character. Other backslash sequences are kept as written.
    pub fn compile(rule: &TransformRule) -> Result<Self> {
        let regex = Regex::new(&rule.pattern)
            .with_context(|| format!("invalid rewrite pattern: {}", rule.pattern))?;
        Ok(Self {
            regex,
            replacement: normalize_replacement(&rule.replacement),
        })
    }

    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.regex.replace_all(text, self.replacement.as_str())
    }
}

pub fn compile_rules(rules: &[TransformRule]) -> Result<Vec<CompiledRule>> {
    rules.iter().map(CompiledRule::compile).collect()
}

/// Rules that only apply to items whose full title matches `pages`.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    pages: Regex,
    rules: Vec<CompiledRule>,
}

impl RuleGroup {
    pub fn compile(pages: &str, rules: &[TransformRule]) -> Result<Self> {
        let pages = Regex::new(pages)
            .with_context(|| format!("invalid modification title pattern: {pages}"))?;
        Ok(Self {
            pages,
            rules: compile_rules(rules)?,
        })
    }

    pub fn matches(&self, title: &Title) -> bool {
        self.pages.is_match(&title.full())
    }
}

/// Ordered rewrite pipeline. Pure: no I/O, no failure modes once compiled.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    groups: Vec<RuleGroup>,
}

impl Transformer {
    pub fn new(groups: Vec<RuleGroup>) -> Self {
        Self { groups }
    }

    /// Matching groups in configuration order, then the item's own rules.
    pub fn rules_for<'a>(
        &'a self,
        title: &Title,
        item_rules: &'a [CompiledRule],
    ) -> Vec<&'a CompiledRule> {
        self.groups
            .iter()
            .filter(|group| group.matches(title))
            .flat_map(|group| group.rules.iter())
            .chain(item_rules.iter())
            .collect()
    }

    pub fn has_rules_for(&self, title: &Title, item_rules: &[CompiledRule]) -> bool {
        !item_rules.is_empty()
            || self
                .groups
                .iter()
                .any(|group| group.matches(title) && !group.rules.is_empty())
    }

    pub fn transform(&self, title: &Title, text: &str, item_rules: &[CompiledRule]) -> String {
        apply_rules(text, self.rules_for(title, item_rules))
    }
}

pub fn apply_rules<'a>(text: &str, rules: impl IntoIterator<Item = &'a CompiledRule>) -> String {
    let mut current = text.to_string();
    for rule in rules {
        let next = match rule.apply(&current) {
            Cow::Owned(changed) => Some(changed),
            Cow::Borrowed(_) => None,
        };
        if let Some(changed) = next {
            current = changed;
        }
    }
    current
}

/// Rewrites a `re.sub` template into `regex` replacement syntax.
fn normalize_replacement(replacement: &str) -> String {
    TEMPLATE_TOKEN_REGEX
        .replace_all(replacement, |caps: &Captures| {
            if let Some(group) = caps.get(1).or_else(|| caps.get(2)) {
                return format!("${{{}}}", group.as_str());
            }
            let literal = match caps.get(3).map(|escape| escape.as_str()) {
                Some("n") => "\n",
                Some("t") => "\t",
                Some("r") => "\r",
                Some("f") => "\x0c",
                Some("v") => "\x0b",
                Some("a") => "\x07",
                Some(_) => "\\",
                None => "$$",
            };
            literal.to_string()
        })
        .into_owned()
}
