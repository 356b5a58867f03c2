use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::title::Title;
use crate::transform::{CompiledRule, RuleGroup, TransformRule, Transformer, compile_rules};

/// Which pages to mirror and how, as written by the operator.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct JobDescription {
    #[serde(default)]
    pub sites: JobSites,
    #[serde(default)]
    pub pages: PageList,
    #[serde(default)]
    pub categories: Vec<CategorySpec>,
    #[serde(default)]
    pub modifications: Vec<Modification>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct JobSites {
    #[serde(alias = "src")]
    pub source: Option<SiteRef>,
    #[serde(alias = "dst")]
    pub target: Option<SiteRef>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SiteRef {
    pub api_url: String,
}

/// Either `["A", {"title": "B", "sync": false}]` or `{"A": {}, "B": {...}}`.
/// The map form is processed in title order.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PageList {
    Entries(Vec<PageEntry>),
    ByTitle(BTreeMap<String, PageOptions>),
}

impl Default for PageList {
    fn default() -> Self {
        Self::Entries(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PageEntry {
    Title(String),
    Detailed {
        title: String,
        #[serde(flatten)]
        options: PageOptions,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PageOptions {
    #[serde(default = "default_true")]
    pub sync: bool,
    #[serde(default = "default_true")]
    pub modify: bool,
    #[serde(default)]
    pub rules: Vec<TransformRule>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            sync: true,
            modify: true,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CategorySpec {
    pub title: String,
    /// Only members in this namespace are mirrored; subcategories are still
    /// walked when `recurse` allows it.
    pub namespace: Option<i32>,
    /// Levels of subcategories to descend into.
    #[serde(default)]
    pub recurse: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Modification {
    pub pages: String,
    #[serde(default)]
    pub substitutions: Vec<TransformRule>,
}

/// A validated request for one page, with its rules compiled.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub title: Title,
    pub sync: bool,
    pub modify: bool,
    pub rules: Vec<CompiledRule>,
}

#[derive(Debug, Clone)]
pub struct CategoryRequest {
    pub title: Title,
    pub namespace: Option<i32>,
    pub recurse: u32,
}

/// Job description after validation. Immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub source_api_url: Option<String>,
    pub target_api_url: Option<String>,
    pub summary: Option<String>,
    pub pages: Vec<PageRequest>,
    pub categories: Vec<CategoryRequest>,
    pub transformer: Transformer,
}

impl JobDescription {
    pub fn entries(&self) -> Vec<(String, PageOptions)> {
        match &self.pages {
            PageList::Entries(entries) => entries
                .iter()
                .map(|entry| match entry {
                    PageEntry::Title(title) => (title.clone(), PageOptions::default()),
                    PageEntry::Detailed { title, options } => (title.clone(), options.clone()),
                })
                .collect(),
            PageList::ByTitle(map) => map
                .iter()
                .map(|(title, options)| (title.clone(), options.clone()))
                .collect(),
        }
    }

    /// Validate titles and compile every pattern. Any failure here is fatal
    /// for the run. A title listed twice keeps its first options.
    pub fn compile(&self) -> Result<CompiledJob> {
        let mut seen = BTreeSet::new();
        let mut pages = Vec::new();
        for (raw, options) in self.entries() {
            let Some(title) = Title::parse(&raw) else {
                bail!("job description lists an empty page title");
            };
            if !seen.insert(title.clone()) {
                continue;
            }
            let rules = compile_rules(&options.rules)
                .with_context(|| format!("invalid rules for page {raw}"))?;
            pages.push(PageRequest {
                title,
                sync: options.sync,
                modify: options.modify,
                rules,
            });
        }

        let mut categories = Vec::new();
        for entry in &self.categories {
            let Some(title) = Title::parse_with_default(&entry.title, crate::title::NS_CATEGORY)
            else {
                bail!("job description lists an empty category title");
            };
            if !title.is_category() {
                bail!("{} is not a category title", entry.title);
            }
            categories.push(CategoryRequest {
                title,
                namespace: entry.namespace,
                recurse: entry.recurse,
            });
        }

        let mut groups = Vec::with_capacity(self.modifications.len());
        for modification in &self.modifications {
            groups.push(
                RuleGroup::compile(&modification.pages, &modification.substitutions)
                    .with_context(|| {
                        format!("invalid modification for pages {}", modification.pages)
                    })?,
            );
        }

        Ok(CompiledJob {
            source_api_url: self.sites.source.as_ref().map(|site| site.api_url.clone()),
            target_api_url: self.sites.target.as_ref().map(|site| site.api_url.clone()),
            summary: self.summary.clone().filter(|value| !value.trim().is_empty()),
            pages,
            categories,
            transformer: Transformer::new(groups),
        })
    }
}

/// Parse a job description; the format follows the file extension
/// (`.yaml`/`.yml`, `.toml`, JSON otherwise).
pub fn load_job(path: &Path) -> Result<JobDescription> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read job description {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    let parsed = match extension.as_deref() {
        Some("yaml" | "yml") => serde_yaml::from_str::<JobDescription>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Some("toml") => toml::from_str::<JobDescription>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        _ => serde_json::from_str::<JobDescription>(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?,
    };
    Ok(parsed)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::title::NS_TEMPLATE;
    use tempfile::tempdir;

    #[test]
    fn parses_list_form_with_original_keys() {
        let job: JobDescription = serde_json::from_str(
            r#"{
                "sites": { "src": { "api_url": "https://en.wikipedia.org/w/api.php" } },
                "pages": ["Main_Page", {"title": "MediaWiki:Common.css", "sync": false}],
                "categories": [{"title": "Physics", "namespace": 0, "recurse": 1}],
                "modifications": [
                    {"pages": "^Main", "substitutions": [{"pattern": "Wikipedia", "repl": "Kiwix"}]}
                ]
            }"#,
        )
        .expect("parse");

        let compiled = job.compile().expect("compile");
        assert_eq!(
            compiled.source_api_url.as_deref(),
            Some("https://en.wikipedia.org/w/api.php")
        );
        assert!(compiled.target_api_url.is_none());
        assert_eq!(compiled.pages.len(), 2);
        assert_eq!(compiled.pages[0].title.full(), "Main Page");
        assert!(compiled.pages[0].sync);
        assert!(!compiled.pages[1].sync);
        assert!(compiled.pages[1].modify);
        assert_eq!(compiled.categories[0].title.full(), "Category:Physics");
        assert_eq!(compiled.categories[0].recurse, 1);
        assert!(
            compiled
                .transformer
                .has_rules_for(&compiled.pages[0].title, &[])
        );
    }

    #[test]
    fn parses_map_form_with_per_page_rules() {
        let job: JobDescription = serde_json::from_str(
            r#"{
                "pages": {
                    "Template:Infobox": {"modify": false},
                    "Alpha": {"rules": [{"pattern": "foo", "replacement": "bar"}]}
                }
            }"#,
        )
        .expect("parse");
        let compiled = job.compile().expect("compile");
        assert_eq!(compiled.pages[0].title.full(), "Alpha");
        assert_eq!(compiled.pages[0].rules.len(), 1);
        assert_eq!(compiled.pages[1].title.namespace(), NS_TEMPLATE);
        assert!(!compiled.pages[1].modify);
        assert!(compiled.pages[1].sync);
    }

    #[test]
    fn duplicate_titles_collapse_to_first_entry() {
        let job: JobDescription =
            serde_json::from_str(r#"{"pages": ["Alpha", "alpha", {"title": "Alpha", "sync": false}]}"#)
                .expect("parse");
        let compiled = job.compile().expect("compile");
        assert_eq!(compiled.pages.len(), 1);
        assert!(compiled.pages[0].sync);
    }

    #[test]
    fn invalid_rule_is_fatal() {
        let job: JobDescription = serde_json::from_str(
            r#"{"pages": {"Alpha": {"rules": [{"pattern": "([", "replacement": ""}]}}}"#,
        )
        .expect("parse");
        let error = job.compile().expect_err("must fail");
        assert!(format!("{error:#}").contains("invalid rewrite pattern"));
    }

    #[test]
    fn rejects_blank_titles_and_non_category_titles() {
        let blank: JobDescription =
            serde_json::from_str(r#"{"pages": ["  "]}"#).expect("parse");
        assert!(blank.compile().is_err());

        let wrong: JobDescription =
            serde_json::from_str(r#"{"categories": [{"title": "Template:X"}]}"#).expect("parse");
        assert!(wrong.compile().is_err());
    }

    #[test]
    fn load_job_selects_format_by_extension() {
        let temp = tempdir().expect("tempdir");
        let yaml_path = temp.path().join("job.yaml");
        fs::write(
            &yaml_path,
            "pages:\n  - Alpha\n  - title: Beta\n    modify: false\nsummary: Sync\n",
        )
        .expect("write yaml");
        let yaml = load_job(&yaml_path).expect("load yaml");
        assert_eq!(yaml.entries().len(), 2);
        assert_eq!(yaml.summary.as_deref(), Some("Sync"));

        let toml_path = temp.path().join("job.toml");
        fs::write(&toml_path, "pages = [\"Alpha\"]\n[sites.target]\napi_url = \"http://localhost/w/api.php\"\n")
            .expect("write toml");
        let toml = load_job(&toml_path).expect("load toml");
        assert_eq!(
            toml.sites.target.map(|site| site.api_url).as_deref(),
            Some("http://localhost/w/api.php")
        );
    }

    #[test]
    fn load_job_reports_syntax_errors() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("job.json");
        fs::write(&path, "{\"pages\": [").expect("write json");
        let error = load_job(&path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
