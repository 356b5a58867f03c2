use std::path::PathBuf;

use serde::Serialize;

use crate::resolver::ItemKind;
use crate::title::Title;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Page or template edited on the local wiki.
    Written,
    Uploaded,
    /// Present locally and left alone because `force` was not set.
    SkippedExisting,
    /// Local rewrite produced no change.
    Unchanged,
    /// Nothing to do: writes disabled for the item and no export configured,
    /// or a local-only page without rules.
    Skipped,
    WouldWrite,
    WouldUpload,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Uploaded => "uploaded",
            Self::SkippedExisting => "skipped_existing",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::WouldWrite => "would_write",
            Self::WouldUpload => "would_upload",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub fetched: usize,
    pub written: usize,
    pub would_write: usize,
    pub skipped: usize,
    pub failed: usize,
    pub exported: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub kind: ItemKind,
    pub title: String,
    pub outcome: Outcome,
    pub exported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub kind: ItemKind,
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub job: String,
    /// True when the run made no write-API calls by request.
    pub dry_run: bool,
    pub pages: KindCounts,
    pub templates: KindCounts,
    pub files: KindCounts,
    pub failures: Vec<FailedItem>,
    pub items: Vec<ItemOutcome>,
    pub remote_requests: usize,
    pub local_requests: usize,
    pub export_dir: Option<PathBuf>,
}

impl RunSummary {
    pub fn new(job: impl Into<String>, dry_run: bool) -> Self {
        Self {
            job: job.into(),
            dry_run,
            ..Self::default()
        }
    }

    pub fn counts(&self, kind: ItemKind) -> &KindCounts {
        match kind {
            ItemKind::Page => &self.pages,
            ItemKind::Template => &self.templates,
            ItemKind::File => &self.files,
        }
    }

    fn counts_mut(&mut self, kind: ItemKind) -> &mut KindCounts {
        match kind {
            ItemKind::Page => &mut self.pages,
            ItemKind::Template => &mut self.templates,
            ItemKind::File => &mut self.files,
        }
    }

    pub fn mark_fetched(&mut self, kind: ItemKind) {
        self.counts_mut(kind).fetched += 1;
    }

    pub fn record(&mut self, kind: ItemKind, title: &Title, outcome: Outcome, exported: bool) {
        let counts = self.counts_mut(kind);
        match outcome {
            Outcome::Written | Outcome::Uploaded => counts.written += 1,
            Outcome::WouldWrite | Outcome::WouldUpload => counts.would_write += 1,
            Outcome::SkippedExisting | Outcome::Unchanged | Outcome::Skipped => {
                counts.skipped += 1
            }
            Outcome::Failed => counts.failed += 1,
        }
        if exported {
            counts.exported += 1;
        }
        self.items.push(ItemOutcome {
            kind,
            title: title.full(),
            outcome,
            exported,
            reason: None,
        });
    }

    pub fn record_failure(&mut self, kind: ItemKind, title: &Title, reason: impl Into<String>) {
        let reason = reason.into();
        self.counts_mut(kind).failed += 1;
        self.failures.push(FailedItem {
            kind,
            title: title.full(),
            reason: reason.clone(),
        });
        self.items.push(ItemOutcome {
            kind,
            title: title.full(),
            outcome: Outcome::Failed,
            exported: false,
            reason: Some(reason),
        });
    }

    pub fn written_pages_and_templates(&self) -> usize {
        self.pages.written + self.templates.written
    }

    pub fn uploaded_files(&self) -> usize {
        self.files.written
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn outcome_of(&self, title: &str) -> Option<Outcome> {
        self.items
            .iter()
            .find(|item| item.title == title)
            .map(|item| item.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(raw: &str) -> Title {
        Title::parse(raw).expect("title")
    }

    #[test]
    fn outcomes_roll_up_into_kind_counts() {
        let mut summary = RunSummary::new("job.json", false);
        summary.mark_fetched(ItemKind::Page);
        summary.mark_fetched(ItemKind::Template);
        summary.record(ItemKind::Page, &title("A"), Outcome::Written, true);
        summary.record(ItemKind::Template, &title("Template:T"), Outcome::SkippedExisting, false);
        summary.record(ItemKind::File, &title("File:F.png"), Outcome::Uploaded, false);
        summary.record_failure(ItemKind::Page, &title("B"), "page not found: B");

        assert_eq!(summary.written_pages_and_templates(), 1);
        assert_eq!(summary.uploaded_files(), 1);
        assert_eq!(summary.templates.skipped, 1);
        assert_eq!(summary.pages.exported, 1);
        assert_eq!(summary.pages.failed, 1);
        assert_eq!(summary.failure_count(), 1);
        assert_eq!(summary.outcome_of("B"), Some(Outcome::Failed));
        assert_eq!(summary.counts(ItemKind::Page).fetched, 1);
    }

    #[test]
    fn serializes_outcomes_in_snake_case() {
        let mut summary = RunSummary::new("job.json", true);
        summary.record(ItemKind::File, &title("File:F.png"), Outcome::WouldUpload, false);
        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["items"][0]["kind"], "file");
        assert_eq!(json["items"][0]["outcome"], "would_upload");
        assert!(json["items"][0].get("reason").is_none());
        assert_eq!(json["files"]["would_write"], 1);
    }
}
