use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{BotCredentials, FileUpload, LocalWriter, RemoteReader};
use crate::config::DEFAULT_SUMMARY;
use crate::export::{ExportSink, SourceRevision};
use crate::job::CompiledJob;
use crate::resolver::{DependencyResolver, ItemKind, PageRecord, ResolveOptions, ResolvedItem};
use crate::summary::{Outcome, RunSummary};
use crate::title::{Title, register_namespace};
use crate::transform::CompiledRule;

/// Global switches for one invocation. Per-page options can only narrow
/// `sync` and `modify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFlags {
    pub force: bool,
    pub sync_templates: bool,
    pub sync_template_dependencies: bool,
    pub upload_files: bool,
    pub sync: bool,
    pub modify: bool,
    /// Edit summary given on the command line; wins over the job's own.
    pub summary: Option<String>,
    /// Used when neither the command line nor the job names a summary.
    pub default_summary: String,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            force: false,
            sync_templates: true,
            sync_template_dependencies: true,
            upload_files: true,
            sync: true,
            modify: true,
            summary: None,
            default_summary: DEFAULT_SUMMARY.to_string(),
        }
    }
}

impl RunFlags {
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            templates: self.sync_templates,
            template_dependencies: self.sync_templates && self.sync_template_dependencies,
            files: self.upload_files,
        }
    }

    fn edit_summary(&self, job: &CompiledJob) -> String {
        self.summary
            .clone()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| job.summary.clone())
            .unwrap_or_else(|| self.default_summary.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Loading,
    Resolving,
    Processing,
    Done,
    Failed,
}

/// Per-title options after narrowing by the global flags.
#[derive(Debug, Clone, Copy)]
struct ItemPlan<'j> {
    sync: bool,
    modify: bool,
    rules: &'j [CompiledRule],
}

/// Drives one job: probe and login, resolve, then process each item in
/// resolution order. Item failures end up in the summary; only startup
/// failures abort.
pub struct MirrorRun<'a, R: RemoteReader, W: LocalWriter> {
    reader: &'a mut R,
    writer: &'a mut W,
    export: Option<&'a mut dyn ExportSink>,
    flags: RunFlags,
    phase: RunPhase,
}

impl<'a, R: RemoteReader, W: LocalWriter> MirrorRun<'a, R, W> {
    pub fn new(reader: &'a mut R, writer: &'a mut W, flags: RunFlags) -> Self {
        Self {
            reader,
            writer,
            export: None,
            flags,
            phase: RunPhase::Idle,
        }
    }

    pub fn with_export(mut self, sink: &'a mut dyn ExportSink) -> Self {
        self.export = Some(sink);
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }

    pub fn execute(
        &mut self,
        job_name: &str,
        job: &CompiledJob,
        credentials: Option<&BotCredentials>,
    ) -> Result<RunSummary> {
        self.enter(RunPhase::Loading);
        if let Err(error) = self.start(credentials) {
            self.enter(RunPhase::Failed);
            return Err(error);
        }

        let mut summary = RunSummary::new(job_name, !self.flags.modify);
        let summary_text = self.flags.edit_summary(job);

        self.enter(RunPhase::Resolving);
        let mut resolver = DependencyResolver::new(self.flags.resolve_options());
        let mut requested = Vec::new();
        let mut plans = BTreeMap::new();
        let mut local_only = Vec::new();
        for (title, plan) in self.plan_pages(job, &mut summary) {
            if plan.sync {
                requested.push(title.clone());
                plans.insert(title, plan);
            } else {
                // Claimed up front so no dependency edge fetches it either.
                resolver.mark_visited(&title);
                local_only.push((title, plan));
            }
        }
        let resolution = resolver.resolve(&mut *self.reader, &requested);
        for failure in &resolution.failures {
            summary.record_failure(failure.kind, &failure.title, failure.error.to_string());
        }

        self.enter(RunPhase::Processing);
        for item in &resolution.items {
            match item {
                ResolvedItem::Record(record) => {
                    summary.mark_fetched(record.kind);
                    let plan = plans.get(&record.title).copied().unwrap_or(ItemPlan {
                        sync: true,
                        modify: self.flags.modify,
                        rules: &[],
                    });
                    self.mirror_record(job, record, plan, &summary_text, &mut summary);
                }
                ResolvedItem::File(title) => {
                    self.upload(title, &summary_text, &mut summary);
                }
            }
        }
        for (title, plan) in &local_only {
            self.rewrite_local(job, title, *plan, &summary_text, &mut summary);
        }

        if let Some(sink) = self.export.as_mut() {
            if let Err(error) = sink.finish() {
                warn!("{error:#}");
            }
        }

        summary.remote_requests = self.reader.request_count();
        summary.local_requests = self.writer.request_count();
        self.enter(RunPhase::Done);
        info!(
            job = job_name,
            written = summary.written_pages_and_templates(),
            uploaded = summary.uploaded_files(),
            failures = summary.failure_count(),
            "run finished"
        );
        Ok(summary)
    }

    /// Startup checks: the source must answer, and the destination must
    /// accept the bot login unless writes are disabled.
    fn start(&mut self, credentials: Option<&BotCredentials>) -> Result<()> {
        let site = self
            .reader
            .site_info()
            .context("source wiki is not reachable")?;
        info!(site = %site.site_name, generator = %site.generator, "source wiki reachable");
        for namespace in &site.namespaces {
            register_namespace(namespace.id, &namespace.name);
        }

        if !self.flags.modify {
            info!("writes disabled; skipping local login");
            return Ok(());
        }
        let Some(credentials) = credentials else {
            bail!("bot credentials are required when writes are enabled");
        };
        self.writer
            .login(credentials)
            .context("failed to log into the destination wiki")?;
        info!(user = %credentials.username, "logged into destination wiki");
        Ok(())
    }

    /// Listed pages in job order, then category members in discovery order,
    /// each with its effective options. Listed pages keep their own options;
    /// category members take the global ones, so `--no-sync` still lists a
    /// category but never fetches its members.
    fn plan_pages<'j>(
        &mut self,
        job: &'j CompiledJob,
        summary: &mut RunSummary,
    ) -> Vec<(Title, ItemPlan<'j>)> {
        let mut seen = BTreeSet::new();
        let mut planned = Vec::new();
        for page in &job.pages {
            if seen.insert(page.title.clone()) {
                planned.push((
                    page.title.clone(),
                    ItemPlan {
                        sync: self.flags.sync && page.sync,
                        modify: self.flags.modify && page.modify,
                        rules: page.rules.as_slice(),
                    },
                ));
            }
        }
        for title in self.expand_categories(job, summary) {
            if seen.insert(title.clone()) {
                planned.push((
                    title,
                    ItemPlan {
                        sync: self.flags.sync,
                        modify: self.flags.modify,
                        rules: &[],
                    },
                ));
            }
        }
        planned
    }

    fn expand_categories(&mut self, job: &CompiledJob, summary: &mut RunSummary) -> Vec<Title> {
        let mut titles = Vec::new();
        for request in &job.categories {
            titles.push(request.title.clone());
            let mut seen = BTreeSet::from([request.title.clone()]);
            let mut queue = VecDeque::from([(request.title.clone(), 0_u32)]);
            while let Some((category, depth)) = queue.pop_front() {
                let members = match self.reader.category_members(&category) {
                    Ok(members) => members,
                    Err(error) => {
                        warn!(%category, "{error:#}");
                        summary.record_failure(ItemKind::Page, &category, format!("{error:#}"));
                        continue;
                    }
                };
                debug!(%category, members = members.len(), "category listed");
                for member in members {
                    if member.is_category() {
                        if depth < request.recurse && seen.insert(member.clone()) {
                            queue.push_back((member, depth + 1));
                        }
                        continue;
                    }
                    if request.namespace.is_none_or(|ns| ns == member.namespace()) {
                        titles.push(member);
                    }
                }
            }
        }
        titles
    }

    fn export_text(
        &mut self,
        kind: ItemKind,
        title: &Title,
        revision: Option<SourceRevision<'_>>,
        content: &str,
    ) -> Result<bool> {
        match self.export.as_mut() {
            Some(sink) => {
                sink.export_text(kind, title, revision, content)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mirror_record(
        &mut self,
        job: &CompiledJob,
        record: &PageRecord,
        plan: ItemPlan<'_>,
        summary_text: &str,
        summary: &mut RunSummary,
    ) {
        let kind = record.kind;
        let title = &record.title;
        let content = job.transformer.transform(title, &record.content, plan.rules);
        let revision = SourceRevision {
            id: record.revision_id,
            timestamp: &record.timestamp,
        };
        let exported = match self.export_text(kind, title, Some(revision), &content) {
            Ok(exported) => exported,
            Err(error) => {
                summary.record_failure(kind, title, format!("{error:#}"));
                return;
            }
        };

        if !plan.modify {
            let outcome = if self.flags.modify {
                Outcome::Skipped
            } else {
                Outcome::WouldWrite
            };
            summary.record(kind, title, outcome, exported);
            return;
        }

        if !self.flags.force {
            match self.writer.page_exists(title) {
                Ok(true) => {
                    debug!(%title, "present locally; not overwriting");
                    summary.record(kind, title, Outcome::SkippedExisting, exported);
                    return;
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(%title, "{error:#}");
                    summary.record_failure(kind, title, format!("{error:#}"));
                    return;
                }
            }
        }

        match self.writer.edit_page(title, &content, summary_text) {
            Ok(()) => {
                info!(kind = kind.as_str(), %title, "written");
                summary.record(kind, title, Outcome::Written, exported);
            }
            Err(error) => {
                warn!(%title, "{error:#}");
                summary.record_failure(kind, title, format!("{error:#}"));
            }
        }
    }

    fn upload(&mut self, title: &Title, summary_text: &str, summary: &mut RunSummary) {
        let writes = self.flags.modify;
        let exists = if writes && !self.flags.force {
            match self.writer.file_exists(title) {
                Ok(exists) => exists,
                Err(error) => {
                    warn!(%title, "{error:#}");
                    summary.record_failure(ItemKind::File, title, format!("{error:#}"));
                    return;
                }
            }
        } else {
            false
        };
        let should_upload = writes && !exists;
        let fallback = if writes {
            Outcome::SkippedExisting
        } else {
            Outcome::WouldUpload
        };
        if !should_upload && self.export.is_none() {
            summary.record(ItemKind::File, title, fallback, false);
            return;
        }

        let file = match self.reader.fetch_file(title) {
            Ok(file) => file,
            Err(error) => {
                warn!(%title, "{error}");
                summary.record_failure(ItemKind::File, title, error.to_string());
                return;
            }
        };
        summary.mark_fetched(ItemKind::File);

        let exported = match self.export.as_mut() {
            Some(sink) => match sink.export_file(&file) {
                Ok(_) => true,
                Err(error) => {
                    summary.record_failure(ItemKind::File, title, format!("{error:#}"));
                    return;
                }
            },
            None => false,
        };

        if !should_upload {
            summary.record(ItemKind::File, title, fallback, exported);
            return;
        }
        let upload = FileUpload {
            title,
            bytes: &file.bytes,
            description: &file.description,
            comment: summary_text,
            ignore_warnings: self.flags.force,
        };
        match self.writer.upload_file(&upload) {
            Ok(()) => {
                info!(%title, bytes = file.bytes.len(), "uploaded");
                summary.record(ItemKind::File, title, Outcome::Uploaded, exported);
            }
            Err(error) => {
                warn!(%title, "{error:#}");
                summary.record_failure(ItemKind::File, title, format!("{error:#}"));
            }
        }
    }

    /// A page that is not synced but has rules: rewrite the local copy.
    fn rewrite_local(
        &mut self,
        job: &CompiledJob,
        title: &Title,
        plan: ItemPlan<'_>,
        summary_text: &str,
        summary: &mut RunSummary,
    ) {
        if !job.transformer.has_rules_for(title, plan.rules) {
            debug!(%title, "not synced and no rules; nothing to do");
            summary.record(ItemKind::Page, title, Outcome::Skipped, false);
            return;
        }
        let current = match self.writer.read_page(title) {
            Ok(Some(text)) => text,
            Ok(None) => {
                summary.record_failure(ItemKind::Page, title, "page does not exist locally");
                return;
            }
            Err(error) => {
                warn!(%title, "{error:#}");
                summary.record_failure(ItemKind::Page, title, format!("{error:#}"));
                return;
            }
        };

        let rewritten = job.transformer.transform(title, &current, plan.rules);
        let exported = match self.export_text(ItemKind::Page, title, None, &rewritten) {
            Ok(exported) => exported,
            Err(error) => {
                summary.record_failure(ItemKind::Page, title, format!("{error:#}"));
                return;
            }
        };
        if rewritten == current {
            summary.record(ItemKind::Page, title, Outcome::Unchanged, exported);
            return;
        }
        if !plan.modify {
            let outcome = if self.flags.modify {
                Outcome::Skipped
            } else {
                Outcome::WouldWrite
            };
            summary.record(ItemKind::Page, title, outcome, exported);
            return;
        }
        match self.writer.edit_page(title, &rewritten, summary_text) {
            Ok(()) => {
                info!(%title, "rewritten in place");
                summary.record(ItemKind::Page, title, Outcome::Written, exported);
            }
            Err(error) => {
                warn!(%title, "{error:#}");
                summary.record_failure(ItemKind::Page, title, format!("{error:#}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::api::{RemoteFile, RemotePage, SiteInfo, SiteNamespace};
    use crate::error::FetchError;
    use crate::export::DirectoryExport;
    use crate::job::JobDescription;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MockReader {
        pages: BTreeMap<String, String>,
        files: BTreeMap<String, Vec<u8>>,
        categories: BTreeMap<String, Vec<String>>,
        namespaces: Vec<SiteNamespace>,
        unreachable: bool,
        fetched: Vec<String>,
        requests: usize,
    }

    impl MockReader {
        fn page(mut self, title: &str, content: &str) -> Self {
            self.pages.insert(title.to_string(), content.to_string());
            self
        }

        fn file(mut self, title: &str, bytes: &[u8]) -> Self {
            self.files.insert(title.to_string(), bytes.to_vec());
            self
        }

        fn category(mut self, title: &str, members: &[&str]) -> Self {
            self.categories.insert(
                title.to_string(),
                members.iter().map(ToString::to_string).collect(),
            );
            self
        }
    }

    impl RemoteReader for MockReader {
        fn site_info(&mut self) -> Result<SiteInfo> {
            self.requests += 1;
            if self.unreachable {
                bail!("connection refused");
            }
            Ok(SiteInfo {
                site_name: "Source".to_string(),
                generator: "MediaWiki 1.43".to_string(),
                base: "https://source.example/wiki/Main_Page".to_string(),
                namespaces: self.namespaces.clone(),
            })
        }

        fn fetch_page(&mut self, title: &Title) -> Result<RemotePage, FetchError> {
            self.requests += 1;
            self.fetched.push(title.full());
            match self.pages.get(&title.full()) {
                Some(content) => Ok(RemotePage {
                    title: title.clone(),
                    revision_id: 100,
                    timestamp: "2026-01-01T00:00:00Z".to_string(),
                    content: content.clone(),
                }),
                None => Err(FetchError::not_found(title.full())),
            }
        }

        fn fetch_file(&mut self, title: &Title) -> Result<RemoteFile, FetchError> {
            self.requests += 1;
            self.fetched.push(title.full());
            match self.files.get(&title.full()) {
                Some(bytes) => Ok(RemoteFile {
                    title: title.clone(),
                    url: format!("https://upload.example/{}", title.name()),
                    sha1: None,
                    description: format!("Description of {}", title.name()),
                    bytes: bytes.clone(),
                }),
                None => Err(FetchError::not_found(title.full())),
            }
        }

        fn category_members(&mut self, category: &Title) -> Result<Vec<Title>> {
            self.requests += 1;
            let Some(members) = self.categories.get(&category.full()) else {
                bail!("unknown category {category}");
            };
            Ok(members.iter().filter_map(|raw| Title::parse(raw)).collect())
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    #[derive(Default)]
    struct MockWriter {
        pages: BTreeMap<String, String>,
        files: BTreeSet<String>,
        reject_login: bool,
        logged_in: bool,
        writes: Vec<String>,
        edits: BTreeMap<String, String>,
        uploads: Vec<(String, bool)>,
        reads: usize,
    }

    impl MockWriter {
        fn with_page(mut self, title: &str, content: &str) -> Self {
            self.pages.insert(title.to_string(), content.to_string());
            self
        }

        fn with_file(mut self, title: &str) -> Self {
            self.files.insert(title.to_string());
            self
        }
    }

    impl LocalWriter for MockWriter {
        fn login(&mut self, credentials: &BotCredentials) -> Result<()> {
            self.writes.push(format!("login:{}", credentials.username));
            if self.reject_login {
                bail!("WrongPass");
            }
            self.logged_in = true;
            Ok(())
        }

        fn page_exists(&mut self, title: &Title) -> Result<bool> {
            self.reads += 1;
            Ok(self.pages.contains_key(&title.full()))
        }

        fn file_exists(&mut self, title: &Title) -> Result<bool> {
            self.reads += 1;
            Ok(self.files.contains(&title.full()))
        }

        fn read_page(&mut self, title: &Title) -> Result<Option<String>> {
            self.reads += 1;
            Ok(self.pages.get(&title.full()).cloned())
        }

        fn edit_page(&mut self, title: &Title, content: &str, summary: &str) -> Result<()> {
            assert!(self.logged_in, "edit before login");
            assert!(!summary.is_empty());
            self.writes.push(format!("edit:{}", title.full()));
            self.edits.insert(title.full(), content.to_string());
            Ok(())
        }

        fn upload_file(&mut self, upload: &FileUpload<'_>) -> Result<()> {
            assert!(self.logged_in, "upload before login");
            self.writes.push(format!("upload:{}", upload.title.full()));
            self.uploads
                .push((upload.title.full(), upload.ignore_warnings));
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.reads + self.writes.len()
        }
    }

    fn credentials() -> BotCredentials {
        BotCredentials {
            username: "MirrorBot".to_string(),
            password: "secret".to_string(),
        }
    }

    fn compile(json: &str) -> CompiledJob {
        serde_json::from_str::<JobDescription>(json)
            .expect("parse job")
            .compile()
            .expect("compile job")
    }

    fn scenario_reader() -> MockReader {
        MockReader::default()
            .page("A", "Intro {{T}} [[File:F.png|thumb]]")
            .page("Template:T", "<b>{{{1}}}</b>")
            .file("File:F.png", b"png-bytes")
    }

    fn run(
        reader: &mut MockReader,
        writer: &mut MockWriter,
        flags: RunFlags,
        job: &CompiledJob,
    ) -> RunSummary {
        let creds = credentials();
        let mut mirror = MirrorRun::new(reader, writer, flags);
        let summary = mirror.execute("job.json", job, Some(&creds)).expect("run");
        assert_eq!(mirror.phase(), RunPhase::Done);
        summary
    }

    #[test]
    fn mirrors_page_with_template_and_file() {
        let job = compile(r#"{"pages": ["A"]}"#);
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default();
        let summary = run(&mut reader, &mut writer, RunFlags::default(), &job);

        assert_eq!(reader.fetched, vec!["A", "Template:T", "File:F.png"]);
        assert_eq!(summary.written_pages_and_templates(), 2);
        assert_eq!(summary.uploaded_files(), 1);
        assert_eq!(summary.failure_count(), 0);
        assert_eq!(
            writer.writes,
            vec![
                "login:MirrorBot",
                "edit:A",
                "upload:File:F.png",
                "edit:Template:T"
            ]
        );
        assert_eq!(writer.uploads, vec![("File:F.png".to_string(), false)]);
        assert!(!summary.dry_run);
    }

    #[test]
    fn missing_page_is_recorded_and_run_completes() {
        let job = compile(r#"{"pages": ["B", "A"]}"#);
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default();
        let summary = run(&mut reader, &mut writer, RunFlags::default(), &job);

        assert_eq!(summary.failure_count(), 1);
        assert_eq!(summary.failures[0].title, "B");
        assert_eq!(summary.failures[0].kind, ItemKind::Page);
        assert!(summary.failures[0].reason.contains("page not found"));
        assert_eq!(summary.written_pages_and_templates(), 2);
    }

    #[test]
    fn no_sync_templates_never_writes_templates() {
        let job = compile(r#"{"pages": ["A"]}"#);
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default();
        let flags = RunFlags {
            sync_templates: false,
            ..RunFlags::default()
        };
        let summary = run(&mut reader, &mut writer, flags, &job);

        assert!(writer.edits.keys().all(|title| !title.starts_with("Template:")));
        assert_eq!(summary.templates.fetched, 0);
        assert_eq!(summary.uploaded_files(), 1);
    }

    #[test]
    fn existing_items_are_kept_unless_forced() {
        let job = compile(r#"{"pages": ["A"]}"#);

        let mut reader = scenario_reader();
        let mut writer = MockWriter::default()
            .with_page("A", "local")
            .with_file("File:F.png");
        let summary = run(&mut reader, &mut writer, RunFlags::default(), &job);
        assert!(!writer.edits.contains_key("A"));
        assert!(writer.uploads.is_empty());
        assert_eq!(summary.outcome_of("A"), Some(Outcome::SkippedExisting));
        assert_eq!(summary.outcome_of("File:F.png"), Some(Outcome::SkippedExisting));
        assert!(!reader.fetched.contains(&"File:F.png".to_string()));

        let mut reader = scenario_reader();
        let mut writer = MockWriter::default()
            .with_page("A", "local")
            .with_file("File:F.png");
        let flags = RunFlags {
            force: true,
            ..RunFlags::default()
        };
        let summary = run(&mut reader, &mut writer, flags, &job);
        assert_eq!(
            writer.edits.get("A").map(String::as_str),
            Some("Intro {{T}} [[File:F.png|thumb]]")
        );
        assert_eq!(writer.uploads, vec![("File:F.png".to_string(), true)]);
        assert_eq!(summary.outcome_of("A"), Some(Outcome::Written));
    }

    #[test]
    fn no_modify_makes_no_write_calls() {
        let job = compile(r#"{"pages": ["A", {"title": "Local", "sync": false, "rules": [{"pattern": "x", "replacement": "y"}]}]}"#);
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default().with_page("Local", "xxx");
        let flags = RunFlags {
            modify: false,
            ..RunFlags::default()
        };
        let mut mirror = MirrorRun::new(&mut reader, &mut writer, flags);
        let summary = mirror.execute("job.json", &job, None).expect("run");

        assert!(writer.writes.is_empty());
        assert!(summary.dry_run);
        assert_eq!(summary.outcome_of("A"), Some(Outcome::WouldWrite));
        assert_eq!(summary.outcome_of("Template:T"), Some(Outcome::WouldWrite));
        assert_eq!(summary.outcome_of("File:F.png"), Some(Outcome::WouldUpload));
        assert_eq!(summary.outcome_of("Local"), Some(Outcome::WouldWrite));
        assert_eq!(summary.pages.would_write, 2);
    }

    #[test]
    fn unsynced_page_with_rules_is_rewritten_locally() {
        let job = compile(
            r#"{"pages": [
                "A",
                {"title": "Template:T", "sync": false, "rules": [{"pattern": "<b>", "replacement": "<strong>"}]},
                {"title": "Untouched", "sync": false}
            ]}"#,
        );
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default()
            .with_page("Template:T", "<b>local</b>")
            .with_page("Untouched", "keep");
        let summary = run(&mut reader, &mut writer, RunFlags::default(), &job);

        assert!(!reader.fetched.contains(&"Template:T".to_string()));
        assert!(!reader.fetched.contains(&"Untouched".to_string()));
        assert_eq!(
            writer.edits.get("Template:T").map(String::as_str),
            Some("<strong>local</b>")
        );
        assert!(!writer.edits.contains_key("Untouched"));
        assert_eq!(summary.outcome_of("Untouched"), Some(Outcome::Skipped));
    }

    #[test]
    fn global_no_sync_turns_rule_pages_into_local_rewrites() {
        let job = compile(
            r#"{"pages": {"A": {"rules": [{"pattern": "Intro", "replacement": "Welcome"}]}}}"#,
        );
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default().with_page("A", "Intro locally");
        let flags = RunFlags {
            sync: false,
            ..RunFlags::default()
        };
        let summary = run(&mut reader, &mut writer, flags, &job);

        assert!(reader.fetched.is_empty());
        assert_eq!(
            writer.edits.get("A").map(String::as_str),
            Some("Welcome locally")
        );
        assert_eq!(summary.written_pages_and_templates(), 1);
    }

    #[test]
    fn modification_groups_apply_to_templates_by_title() {
        let job = compile(
            r#"{
                "pages": {"A": {"rules": [{"pattern": "Intro", "replacement": "Start"}]}},
                "modifications": [
                    {"pages": "^Template:", "substitutions": [{"pattern": "<b>(.*)</b>", "repl": "'''\\1'''"}]}
                ]
            }"#,
        );
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default();
        run(&mut reader, &mut writer, RunFlags::default(), &job);

        assert_eq!(
            writer.edits.get("Template:T").map(String::as_str),
            Some("'''{{{1}}}'''")
        );
        assert_eq!(
            writer.edits.get("A").map(String::as_str),
            Some("Start {{T}} [[File:F.png|thumb]]")
        );
    }

    #[test]
    fn per_page_modify_false_is_exported_but_not_written() {
        let temp = tempdir().expect("tempdir");
        let mut sink = DirectoryExport::create(temp.path()).expect("export");
        let job = compile(r#"{"pages": {"A": {"modify": false}}}"#);
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default();
        let creds = credentials();
        let summary = {
            let mut mirror =
                MirrorRun::new(&mut reader, &mut writer, RunFlags::default()).with_export(&mut sink);
            mirror.execute("job.json", &job, Some(&creds)).expect("run")
        };

        assert!(!writer.edits.contains_key("A"));
        assert_eq!(summary.outcome_of("A"), Some(Outcome::Skipped));
        assert_eq!(summary.pages.exported, 1);
        assert!(temp.path().join("pages").join("A.wiki").exists());
        assert!(temp.path().join("templates").join("Template--T.wiki").exists());
        assert!(temp.path().join("files").join("F.png").exists());
        assert!(temp.path().join("manifest.json").exists());
        assert_eq!(sink.entries().len(), 3);
    }

    #[test]
    fn categories_expand_members_with_filter_and_depth() {
        let job = compile(
            r#"{"categories": [{"title": "Physics", "namespace": 0, "recurse": 1}]}"#,
        );
        let mut reader = MockReader::default()
            .category("Category:Physics", &["Gravity", "Help:Units", "Category:Optics"])
            .category("Category:Optics", &["Lens", "Category:Lasers"])
            .category("Category:Lasers", &["Maser"])
            .page("Category:Physics", "Physics pages")
            .page("Gravity", "g")
            .page("Lens", "l")
            .page("Maser", "m");
        let mut writer = MockWriter::default();
        let summary = run(&mut reader, &mut writer, RunFlags::default(), &job);

        let written: Vec<&str> = writer.edits.keys().map(String::as_str).collect();
        assert_eq!(written, vec!["Category:Physics", "Gravity", "Lens"]);
        assert_eq!(summary.failure_count(), 0);
    }

    #[test]
    fn no_sync_lists_categories_without_fetching_members() {
        let job = compile(
            r#"{
                "categories": [{"title": "Physics", "namespace": 0, "recurse": 0}],
                "modifications": [
                    {"pages": "^Gravity$", "substitutions": [{"pattern": "^g", "repl": "G"}]}
                ]
            }"#,
        );
        let mut reader = MockReader::default()
            .category("Category:Physics", &["Gravity", "Inertia"])
            .page("Category:Physics", "Physics pages")
            .page("Gravity", "g remote")
            .page("Inertia", "i remote");
        let mut writer = MockWriter::default()
            .with_page("Gravity", "g local")
            .with_page("Inertia", "i local");
        let flags = RunFlags {
            sync: false,
            ..RunFlags::default()
        };
        let summary = run(&mut reader, &mut writer, flags, &job);

        assert!(reader.fetched.is_empty());
        assert_eq!(
            writer.edits.get("Gravity").map(String::as_str),
            Some("G local")
        );
        assert_eq!(writer.edits.len(), 1);
        assert_eq!(summary.outcome_of("Category:Physics"), Some(Outcome::Skipped));
        assert_eq!(summary.outcome_of("Inertia"), Some(Outcome::Skipped));
        assert_eq!(summary.pages.fetched, 0);
        assert_eq!(summary.failure_count(), 0);
    }

    #[test]
    fn category_filter_uses_the_source_wiki_namespace_names() {
        let job = compile(r#"{"categories": [{"title": "Help", "namespace": 4, "recurse": 0}]}"#);
        let mut reader = MockReader {
            namespaces: vec![SiteNamespace {
                id: 4,
                name: "Wikipedia".to_string(),
            }],
            ..MockReader::default()
        }
        .category("Category:Help", &["Wikipedia:About", "Main article"])
        .page("Category:Help", "Help pages")
        .page("Project:About", "About this wiki")
        .page("Main article", "text");
        let mut writer = MockWriter::default();
        let summary = run(&mut reader, &mut writer, RunFlags::default(), &job);

        let written: Vec<&str> = writer.edits.keys().map(String::as_str).collect();
        assert_eq!(written, vec!["Category:Help", "Project:About"]);
        assert_eq!(summary.failure_count(), 0);
    }

    #[test]
    fn unreachable_source_fails_before_any_item() {
        let job = compile(r#"{"pages": ["A"]}"#);
        let mut reader = scenario_reader();
        reader.unreachable = true;
        let mut writer = MockWriter::default();
        let creds = credentials();
        let mut mirror = MirrorRun::new(&mut reader, &mut writer, RunFlags::default());
        let error = mirror
            .execute("job.json", &job, Some(&creds))
            .expect_err("must fail");
        assert_eq!(mirror.phase(), RunPhase::Failed);
        assert!(format!("{error:#}").contains("source wiki is not reachable"));
        assert!(reader.fetched.is_empty());
        assert!(writer.writes.is_empty());
    }

    #[test]
    fn writes_require_credentials_and_a_successful_login() {
        let job = compile(r#"{"pages": ["A"]}"#);
        let mut reader = scenario_reader();
        let mut writer = MockWriter::default();
        let mut mirror = MirrorRun::new(&mut reader, &mut writer, RunFlags::default());
        assert!(mirror.execute("job.json", &job, None).is_err());
        assert_eq!(mirror.phase(), RunPhase::Failed);

        let mut reader = scenario_reader();
        let mut writer = MockWriter {
            reject_login: true,
            ..MockWriter::default()
        };
        let creds = credentials();
        let mut mirror = MirrorRun::new(&mut reader, &mut writer, RunFlags::default());
        let error = mirror
            .execute("job.json", &job, Some(&creds))
            .expect_err("must fail");
        assert!(format!("{error:#}").contains("WrongPass"));
        assert!(reader.fetched.is_empty());
    }

    #[test]
    fn edit_summary_prefers_command_line_then_job() {
        let job = compile(r#"{"pages": ["A"], "summary": "Job summary"}"#);
        let flags = RunFlags::default();
        assert_eq!(flags.edit_summary(&job), "Job summary");
        let flags = RunFlags {
            summary: Some("Manual".to_string()),
            ..RunFlags::default()
        };
        assert_eq!(flags.edit_summary(&job), "Manual");
        let job = compile(r#"{"pages": ["A"]}"#);
        assert_eq!(RunFlags::default().edit_summary(&job), DEFAULT_SUMMARY);
    }
}
