use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::api::RemoteFile;
use crate::resolver::ItemKind;
use crate::title::{Title, namespace_name};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Source revision an exported text was fetched at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRevision<'a> {
    pub id: i64,
    pub timestamp: &'a str,
}

/// Destination for fetched and transformed content besides the local wiki.
pub trait ExportSink {
    /// Store wikitext for a page or template; returns the written path.
    /// Local rewrites have no source revision.
    fn export_text(
        &mut self,
        kind: ItemKind,
        title: &Title,
        revision: Option<SourceRevision<'_>>,
        content: &str,
    ) -> Result<PathBuf>;
    /// Store a file payload next to its description text.
    fn export_file(&mut self, file: &RemoteFile) -> Result<PathBuf>;
    /// Write title lists and the manifest. Returns the manifest path.
    fn finish(&mut self) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub kind: ItemKind,
    pub title: String,
    pub revision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub path: String,
    pub sha256: String,
    /// Upstream download URL and SHA-1 as reported by the source wiki.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sha1: Option<String>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    items: &'a [ManifestEntry],
}

/// Export tree rooted at one directory:
/// `pages/`, `templates/`, `files/`, one `mirroring_export_<kind>.json` title
/// list per kind and `manifest.json`.
#[derive(Debug)]
pub struct DirectoryExport {
    root: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl DirectoryExport {
    pub fn create(root: &Path) -> Result<Self> {
        for kind in [ItemKind::Page, ItemKind::Template, ItemKind::File] {
            let dir = root.join(kind_dir(kind));
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            entries: Vec::new(),
        })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    fn store(&mut self, entry: ManifestEntry, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.root.join(&entry.path);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(kind = entry.kind.as_str(), title = %entry.title, path = %path.display(), "exported");
        self.entries
            .retain(|existing| !(existing.kind == entry.kind && existing.title == entry.title));
        self.entries.push(entry);
        Ok(path)
    }
}

impl ExportSink for DirectoryExport {
    fn export_text(
        &mut self,
        kind: ItemKind,
        title: &Title,
        revision: Option<SourceRevision<'_>>,
        content: &str,
    ) -> Result<PathBuf> {
        let entry = ManifestEntry {
            kind,
            title: title.full(),
            revision: revision.map(|revision| revision.id),
            timestamp: revision.map(|revision| revision.timestamp.to_string()),
            path: format!("{}/{}.wiki", kind_dir(kind), title.file_stem()),
            sha256: sha256_hex(content.as_bytes()),
            source_url: None,
            source_sha1: None,
        };
        self.store(entry, content.as_bytes())
    }

    fn export_file(&mut self, file: &RemoteFile) -> Result<PathBuf> {
        let name = file_name(&file.title);
        let description_path = self
            .root
            .join(kind_dir(ItemKind::File))
            .join(format!("{name}.wiki"));
        fs::write(&description_path, &file.description)
            .with_context(|| format!("failed to write {}", description_path.display()))?;
        let entry = ManifestEntry {
            kind: ItemKind::File,
            title: file.title.full(),
            revision: None,
            timestamp: None,
            path: format!("{}/{name}", kind_dir(ItemKind::File)),
            sha256: sha256_hex(&file.bytes),
            source_url: Some(file.url.clone()).filter(|url| !url.is_empty()),
            source_sha1: file.sha1.clone(),
        };
        self.store(entry, &file.bytes)
    }

    fn finish(&mut self) -> Result<PathBuf> {
        for kind in [ItemKind::Page, ItemKind::Template, ItemKind::File] {
            let titles = self
                .entries
                .iter()
                .filter(|entry| entry.kind == kind)
                .map(|entry| entry.title.as_str())
                .collect::<Vec<_>>();
            let path = self
                .root
                .join(format!("mirroring_export_{}.json", kind_dir(kind)));
            let rendered = serde_json::to_string_pretty(&titles)
                .context("failed to serialize export title list")?;
            fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let manifest_path = self.root.join(MANIFEST_FILE);
        let rendered = serde_json::to_string_pretty(&Manifest {
            items: &self.entries,
        })
        .context("failed to serialize export manifest")?;
        fs::write(&manifest_path, rendered)
            .with_context(|| format!("failed to write {}", manifest_path.display()))?;
        info!(
            items = self.entries.len(),
            path = %manifest_path.display(),
            "export manifest written"
        );
        Ok(manifest_path)
    }
}

fn kind_dir(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Page => "pages",
        ItemKind::Template => "templates",
        ItemKind::File => "files",
    }
}

/// Uploaded files keep their own name, without the namespace prefix.
fn file_name(title: &Title) -> String {
    let stem = title.file_stem();
    match namespace_name(title.namespace()) {
        Some(prefix) => stem
            .strip_prefix(&format!("{prefix}--"))
            .map(ToString::to_string)
            .unwrap_or(stem),
        None => stem,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
