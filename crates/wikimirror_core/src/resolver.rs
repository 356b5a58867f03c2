use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::RemoteReader;
use crate::error::LookupFailed;
use crate::title::Title;
use crate::wikitext::{Dependency, DependencyKind, parse_redirect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Page,
    Template,
    File,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Template => "template",
            Self::File => "file",
        }
    }
}

impl From<DependencyKind> for ItemKind {
    fn from(kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Template => Self::Template,
            DependencyKind::File => Self::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub templates: bool,
    /// Also follow templates used by templates. Ignored without `templates`.
    pub template_dependencies: bool,
    pub files: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            templates: true,
            template_dependencies: true,
            files: true,
        }
    }
}

/// A fetched page or template waiting to be transformed and written.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub title: Title,
    pub kind: ItemKind,
    pub content: String,
    pub revision_id: i64,
    pub timestamp: String,
    pub dependencies: Vec<Dependency>,
    pub redirect_target: Option<Title>,
}

#[derive(Debug, Clone)]
pub enum ResolvedItem {
    Record(PageRecord),
    /// Files are only named during resolution; their payload is fetched
    /// when the item is processed.
    File(Title),
}

impl ResolvedItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Record(record) => record.kind,
            Self::File(_) => ItemKind::File,
        }
    }

    pub fn title(&self) -> &Title {
        match self {
            Self::Record(record) => &record.title,
            Self::File(title) => title,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveFailure {
    pub kind: ItemKind,
    pub title: Title,
    pub error: LookupFailed,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Every item in the order it was reached.
    pub items: Vec<ResolvedItem>,
    pub failures: Vec<ResolveFailure>,
}

impl Resolution {
    /// Templates and files reached from the requested pages.
    pub fn dependency_set(&self) -> BTreeSet<Dependency> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ResolvedItem::Record(record) if record.kind == ItemKind::Template => {
                    Some(Dependency {
                        kind: DependencyKind::Template,
                        title: record.title.clone(),
                    })
                }
                ResolvedItem::File(title) => Some(Dependency {
                    kind: DependencyKind::File,
                    title: title.clone(),
                }),
                ResolvedItem::Record(_) => None,
            })
            .collect()
    }
}

/// Breadth-first closure over the template/file graph. The visited set lives
/// as long as the resolver, so a title is queued at most once per run no
/// matter how many paths reach it.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    options: ResolveOptions,
    visited: BTreeSet<Title>,
}

impl DependencyResolver {
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            visited: BTreeSet::new(),
        }
    }

    /// Claim a title so the resolver never queues it. Returns false when it
    /// was already claimed.
    pub fn mark_visited(&mut self, title: &Title) -> bool {
        self.visited.insert(title.clone())
    }

    pub fn resolve<R: RemoteReader>(&mut self, reader: &mut R, requested: &[Title]) -> Resolution {
        let mut resolution = Resolution::default();
        let mut queue = VecDeque::new();
        for title in requested {
            if self.mark_visited(title) {
                queue.push_back((ItemKind::Page, title.clone()));
            }
        }

        while let Some((kind, title)) = queue.pop_front() {
            let record = match self.lookup(reader, kind, &title) {
                Ok(record) => record,
                Err(error) => {
                    warn!(kind = kind.as_str(), %title, "{error}");
                    resolution.failures.push(ResolveFailure { kind, title, error });
                    continue;
                }
            };

            if let Some(target) = &record.redirect_target {
                if self.mark_visited(target) {
                    debug!(%title, %target, "following redirect");
                    queue.push_back((kind, target.clone()));
                }
            }

            let expand_templates = self.options.templates
                && (kind == ItemKind::Page || self.options.template_dependencies);
            let mut files = Vec::new();
            for dependency in &record.dependencies {
                match dependency.kind {
                    DependencyKind::Template if expand_templates => {
                        if self.mark_visited(&dependency.title) {
                            queue.push_back((ItemKind::Template, dependency.title.clone()));
                        }
                    }
                    DependencyKind::File if self.options.files => {
                        if self.mark_visited(&dependency.title) {
                            files.push(dependency.title.clone());
                        }
                    }
                    _ => {}
                }
            }

            resolution.items.push(ResolvedItem::Record(record));
            resolution
                .items
                .extend(files.into_iter().map(ResolvedItem::File));
        }

        info!(
            items = resolution.items.len(),
            failures = resolution.failures.len(),
            "dependency resolution finished"
        );
        resolution
    }

    /// Fetch one title and list what it embeds, minus itself.
    fn lookup<R: RemoteReader>(
        &self,
        reader: &mut R,
        kind: ItemKind,
        title: &Title,
    ) -> Result<PageRecord, LookupFailed> {
        let page = reader
            .fetch_page(title)
            .map_err(|source| LookupFailed { source })?;
        let dependencies = reader
            .embedded_dependencies(&page.content)
            .into_iter()
            .filter(|dependency| dependency.title != *title)
            .collect::<Vec<_>>();
        let redirect_target = parse_redirect(&page.content).filter(|target| target != title);
        debug!(
            kind = kind.as_str(),
            %title,
            dependencies = dependencies.len(),
            "fetched"
        );
        Ok(PageRecord {
            title: title.clone(),
            kind,
            content: page.content,
            revision_id: page.revision_id,
            timestamp: page.timestamp,
            dependencies,
            redirect_target,
        })
    }
}
