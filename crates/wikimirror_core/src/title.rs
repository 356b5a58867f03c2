use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use serde::Serialize;

pub const NS_MAIN: i32 = 0;
pub const NS_USER: i32 = 2;
pub const NS_PROJECT: i32 = 4;
pub const NS_FILE: i32 = 6;
pub const NS_MEDIAWIKI: i32 = 8;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_HELP: i32 = 12;
pub const NS_CATEGORY: i32 = 14;
pub const NS_MODULE: i32 = 828;

/// Canonical namespace names first, aliases after. Lookup is case-insensitive.
const NAMESPACES: &[(&str, i32)] = &[
    ("Talk", 1),
    ("User", NS_USER),
    ("User talk", 3),
    ("Project", NS_PROJECT),
    ("Project talk", 5),
    ("File", NS_FILE),
    ("File talk", 7),
    ("MediaWiki", NS_MEDIAWIKI),
    ("MediaWiki talk", 9),
    ("Template", NS_TEMPLATE),
    ("Template talk", 11),
    ("Help", NS_HELP),
    ("Help talk", 13),
    ("Category", NS_CATEGORY),
    ("Category talk", 15),
    ("Module", NS_MODULE),
    ("Module talk", 829),
    ("Image", NS_FILE),
    ("Image talk", 7),
];

/// Local names and aliases reported by the source wiki. Canonical names keep
/// priority when a title is rendered.
#[derive(Debug, Default)]
struct SiteNamespaces {
    names: BTreeMap<i32, String>,
    aliases: BTreeMap<String, i32>,
}

static SITE_NAMESPACES: OnceLock<Mutex<SiteNamespaces>> = OnceLock::new();

/// A normalized wiki title. Two titles that MediaWiki would treat as the same
/// page compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Title {
    namespace: i32,
    name: String,
}

impl Title {
    /// Parse a full title such as `Template:Infobox_person`. Unknown prefixes
    /// stay part of the name in the main namespace.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::parse_with_default(raw, NS_MAIN)
    }

    /// Parse a title that falls back to `default_namespace` when it carries no
    /// known prefix. A leading colon forces the main namespace, the same way
    /// `{{:Page}}` transcludes an article.
    pub fn parse_with_default(raw: &str, default_namespace: i32) -> Option<Self> {
        let without_fragment = raw.split('#').next().unwrap_or_default();
        let cleaned = normalize_spacing(without_fragment);
        if cleaned.is_empty() {
            return None;
        }

        if let Some(rest) = cleaned.strip_prefix(':') {
            if rest.trim_start().starts_with(':') {
                return None;
            }
            return Self::parse_with_default(rest, NS_MAIN);
        }

        if let Some((prefix, rest)) = cleaned.split_once(':')
            && let Some(namespace) = namespace_id(prefix)
        {
            let name = capitalize_first(rest.trim());
            if name.is_empty() {
                return None;
            }
            return Some(Self { namespace, name });
        }

        Some(Self {
            namespace: default_namespace,
            name: capitalize_first(&cleaned),
        })
    }

    pub fn new(namespace: i32, name: &str) -> Option<Self> {
        let name = capitalize_first(&normalize_spacing(name));
        if name.is_empty() {
            return None;
        }
        Some(Self { namespace, name })
    }

    pub fn namespace(&self) -> i32 {
        self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_file(&self) -> bool {
        self.namespace == NS_FILE
    }

    pub fn is_category(&self) -> bool {
        self.namespace == NS_CATEGORY
    }

    pub fn full(&self) -> String {
        match namespace_name(self.namespace) {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None if self.namespace == NS_MAIN => self.name.clone(),
            None => format!("{}:{}", self.namespace, self.name),
        }
    }

    /// File-system friendly rendering of the full title.
    pub fn file_stem(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 16);
        for ch in self.full().chars() {
            match ch {
                ' ' => out.push('_'),
                '/' => out.push_str("___"),
                ':' => out.push_str("--"),
                '\\' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
                other => out.push(other),
            }
        }
        out
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// Make a site-specific namespace name (`Wikipedia`, `Portal`, `Plik`)
/// known to title parsing. Registering the main namespace is a no-op.
pub fn register_namespace(id: i32, name: &str) {
    let normalized = normalize_spacing(name);
    if id == NS_MAIN || normalized.is_empty() {
        return;
    }
    let registry = SITE_NAMESPACES.get_or_init(|| Mutex::new(SiteNamespaces::default()));
    let Ok(mut guard) = registry.lock() else {
        return;
    };
    guard.aliases.insert(normalized.to_lowercase(), id);
    guard.names.entry(id).or_insert(normalized);
}

pub fn namespace_id(prefix: &str) -> Option<i32> {
    let normalized = normalize_spacing(prefix);
    if let Some((_, id)) = NAMESPACES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&normalized))
    {
        return Some(*id);
    }
    let guard = SITE_NAMESPACES.get()?.lock().ok()?;
    guard.aliases.get(&normalized.to_lowercase()).copied()
}

pub fn namespace_name(id: i32) -> Option<String> {
    if let Some((name, _)) = NAMESPACES.iter().find(|(_, namespace)| *namespace == id) {
        return Some((*name).to_string());
    }
    let guard = SITE_NAMESPACES.get()?.lock().ok()?;
    guard.names.get(&id).cloned()
}

fn normalize_spacing(value: &str) -> String {
    value
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
