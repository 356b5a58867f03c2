use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::title::{NS_FILE, NS_MODULE, NS_TEMPLATE, Title};

static IGNORED_MARKUP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<nowiki\s*>.*?</nowiki\s*>|<pre\b[^>]*>.*?</pre\s*>").unwrap()
});

static FILE_LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[\[\s*(?:file|image|media)\s*:\s*([^|\]\n]+?)\s*(?:\||\]\])").unwrap()
});

static GALLERY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<gallery\b[^>]*>(.*?)</gallery\s*>").unwrap());

static GALLERY_PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:file|image)\s*:").unwrap());

/// Variables are case-sensitive; `{{Currentyear}}` is a template.
const MAGIC_VARIABLES: &[&str] = &[
    "!",
    "=",
    "CURRENTYEAR",
    "CURRENTMONTH",
    "CURRENTMONTH1",
    "CURRENTMONTH2",
    "CURRENTMONTHNAME",
    "CURRENTMONTHNAMEGEN",
    "CURRENTMONTHABBREV",
    "CURRENTDAY",
    "CURRENTDAY2",
    "CURRENTDAYNAME",
    "CURRENTDOW",
    "CURRENTWEEK",
    "CURRENTHOUR",
    "CURRENTTIME",
    "CURRENTTIMESTAMP",
    "LOCALYEAR",
    "LOCALMONTH",
    "LOCALMONTH1",
    "LOCALMONTH2",
    "LOCALMONTHNAME",
    "LOCALMONTHNAMEGEN",
    "LOCALMONTHABBREV",
    "LOCALDAY",
    "LOCALDAY2",
    "LOCALDAYNAME",
    "LOCALDOW",
    "LOCALWEEK",
    "LOCALHOUR",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "SITENAME",
    "SERVER",
    "SERVERNAME",
    "SCRIPTPATH",
    "STYLEPATH",
    "ARTICLEPATH",
    "CURRENTVERSION",
    "CONTENTLANGUAGE",
    "CONTENTLANG",
    "PAGELANGUAGE",
    "DIRECTIONMARK",
    "DIRMARK",
    "BCP47",
    "DIR",
    "NUMBEROFARTICLES",
    "NUMBEROFPAGES",
    "NUMBEROFFILES",
    "NUMBEROFEDITS",
    "NUMBEROFUSERS",
    "NUMBEROFACTIVEUSERS",
    "NUMBEROFADMINS",
    "PAGEID",
    "PAGENAME",
    "PAGENAMEE",
    "FULLPAGENAME",
    "FULLPAGENAMEE",
    "BASEPAGENAME",
    "BASEPAGENAMEE",
    "ROOTPAGENAME",
    "ROOTPAGENAMEE",
    "SUBPAGENAME",
    "SUBPAGENAMEE",
    "TALKPAGENAME",
    "TALKPAGENAMEE",
    "SUBJECTPAGENAME",
    "SUBJECTPAGENAMEE",
    "ARTICLEPAGENAME",
    "ARTICLEPAGENAMEE",
    "NAMESPACE",
    "NAMESPACEE",
    "NAMESPACENUMBER",
    "TALKSPACE",
    "TALKSPACEE",
    "SUBJECTSPACE",
    "SUBJECTSPACEE",
    "ARTICLESPACE",
    "ARTICLESPACEE",
    "REVISIONID",
    "REVISIONDAY",
    "REVISIONDAY2",
    "REVISIONMONTH",
    "REVISIONMONTH1",
    "REVISIONYEAR",
    "REVISIONTIMESTAMP",
    "REVISIONUSER",
    "REVISIONSIZE",
    "CASCADINGSOURCES",
];

/// Parser functions written without a leading `#`. Case-insensitive.
const MAGIC_FUNCTIONS: &[&str] = &[
    "int",
    "ns",
    "nse",
    "lc",
    "uc",
    "lcfirst",
    "ucfirst",
    "urlencode",
    "anchorencode",
    "fullurl",
    "fullurle",
    "localurl",
    "localurle",
    "canonicalurl",
    "filepath",
    "formatnum",
    "padleft",
    "padright",
    "plural",
    "grammar",
    "gender",
    "tag",
    "displaytitle",
    "defaultsort",
    "defaultsortkey",
    "defaultcategorysort",
    "pagesincategory",
    "pagesincat",
    "pagesinnamespace",
    "pagesinns",
    "pagesize",
    "protectionlevel",
    "protectionexpiry",
    "numberingroup",
    "special",
    "speciale",
    "bidi",
];

const TRANSCLUSION_MODIFIERS: &[&str] = &["subst:", "safesubst:", "msgnw:", "msg:", "raw:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Template,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub title: Title,
}

/// Templates (including `#invoke` modules) and files embedded in `text`, in
/// order of first appearance, templates first.
pub fn embedded_dependencies(text: &str) -> Vec<Dependency> {
    let visible = IGNORED_MARKUP_REGEX.replace_all(text, "");
    let mut seen = BTreeSet::new();
    let mut output = Vec::new();

    for title in embedded_templates(&visible) {
        if seen.insert(title.clone()) {
            output.push(Dependency {
                kind: DependencyKind::Template,
                title,
            });
        }
    }
    for title in embedded_files(&visible) {
        if seen.insert(title.clone()) {
            output.push(Dependency {
                kind: DependencyKind::File,
                title,
            });
        }
    }
    output
}

/// Target of a `#REDIRECT [[Target]]` page, if `text` is one.
pub fn parse_redirect(text: &str) -> Option<Title> {
    let trimmed = text.trim_start();
    let head = trimmed.get(..9)?;
    if !head.eq_ignore_ascii_case("#redirect") {
        return None;
    }
    let start = trimmed.find("[[")?;
    let end = trimmed[start + 2..].find("]]")?;
    let target = &trimmed[start + 2..start + 2 + end];
    let target = target.split('|').next().unwrap_or_default();
    Title::parse(target)
}

fn embedded_templates(text: &str) -> Vec<Title> {
    let bytes = text.as_bytes();
    let mut output = Vec::new();
    let mut index = 0usize;

    while index < bytes.len() {
        if bytes[index] != b'{' {
            index += 1;
            continue;
        }
        let run = bytes[index..].iter().take_while(|byte| **byte == b'{').count();
        let start = index + run;
        index = start;
        // `{{{param}}}` is a parameter, longer runs are ambiguous.
        if run != 2 {
            continue;
        }

        let rest = &text[start..];
        let end = rest.find(['|', '}', '{']).unwrap_or(rest.len());
        if rest[end..].starts_with('{') {
            continue;
        }
        if let Some(title) = template_title(&rest[..end]) {
            output.push(title);
        }
    }
    output
}

fn template_title(raw_name: &str) -> Option<Title> {
    let mut name = raw_name.trim();
    if name.is_empty() {
        return None;
    }

    if let Some(function) = name.strip_prefix('#') {
        let (keyword, argument) = function.split_once(':')?;
        if keyword.trim().eq_ignore_ascii_case("invoke") {
            return Title::parse_with_default(argument, NS_MODULE)
                .filter(|title| title.namespace() == NS_MODULE);
        }
        return None;
    }

    loop {
        let lowered = name.to_ascii_lowercase();
        match TRANSCLUSION_MODIFIERS
            .iter()
            .find(|modifier| lowered.starts_with(**modifier))
        {
            Some(modifier) => name = name[modifier.len()..].trim_start(),
            None => break,
        }
    }

    let head = name.split(':').next().unwrap_or(name).trim();
    if MAGIC_VARIABLES.contains(&head)
        || (name.contains(':')
            && MAGIC_FUNCTIONS
                .iter()
                .any(|function| function.eq_ignore_ascii_case(head)))
    {
        return None;
    }

    Title::parse_with_default(name, NS_TEMPLATE)
}

fn embedded_files(text: &str) -> Vec<Title> {
    let mut output = Vec::new();
    for captures in FILE_LINK_REGEX.captures_iter(text) {
        if let Some(title) = Title::new(NS_FILE, &captures[1]) {
            output.push(title);
        }
    }
    for gallery in GALLERY_REGEX.captures_iter(text) {
        for line in gallery[1].lines() {
            let entry = line.split('|').next().unwrap_or_default();
            let entry = GALLERY_PREFIX_REGEX.replace(entry, "");
            if let Some(title) = Title::new(NS_FILE, &entry) {
                output.push(title);
            }
        }
    }
    output
}
