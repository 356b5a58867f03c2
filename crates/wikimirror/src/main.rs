use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wikimirror_core::config::{DEFAULT_CONFIG_PATH, EnvOverrides, MirrorConfig, load_config};
use wikimirror_core::controller::{MirrorRun, RunFlags};
use wikimirror_core::export::DirectoryExport;
use wikimirror_core::job::{CompiledJob, load_job};
use wikimirror_core::mediawiki::MediaWikiClient;
use wikimirror_core::resolver::ItemKind;
use wikimirror_core::summary::RunSummary;

#[derive(Debug, Parser)]
#[command(
    name = "wikimirror",
    version,
    about = "Mirror pages, templates and files from a remote MediaWiki into a local one"
)]
struct Cli {
    /// Job description files (JSON, YAML or TOML), processed in order
    #[arg(value_name = "JOB", required = true)]
    jobs: Vec<PathBuf>,
    /// Overwrite pages and files that already exist locally
    #[arg(short, long)]
    force: bool,
    /// Do not mirror templates (implies --no-sync-dependances-templates)
    #[arg(short = 't', long)]
    no_sync_templates: bool,
    /// Do not mirror templates used by templates
    #[arg(short = 'd', long)]
    no_sync_dependances_templates: bool,
    /// Do not mirror referenced files
    #[arg(short = 'u', long)]
    no_upload_files: bool,
    /// Do not fetch pages remotely; only apply rules to local copies
    #[arg(long)]
    no_sync: bool,
    /// Never write to the local wiki
    #[arg(long)]
    no_modify: bool,
    /// Also write fetched content below this directory
    #[arg(short, long, value_name = "PATH")]
    export_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Edit summary for local writes
    #[arg(long, value_name = "TEXT")]
    summary: Option<String>,
    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn run_flags(&self, config: &MirrorConfig) -> RunFlags {
        RunFlags {
            force: self.force,
            sync_templates: !self.no_sync_templates,
            sync_template_dependencies: !self.no_sync_templates
                && !self.no_sync_dependances_templates,
            upload_files: !self.no_upload_files,
            sync: !self.no_sync,
            modify: !self.no_modify,
            summary: self.summary.clone(),
            default_summary: config.summary(),
        }
    }
}

fn init_tracing(verbose: u8) {
    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(
            FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(false)
                .finish(),
        ),
        Err(_) => {
            let level = match verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            };
            tracing::subscriber::set_global_default(
                FmtSubscriber::builder()
                    .with_max_level(level)
                    .with_target(false)
                    .finish(),
            )
        }
    };
    if let Err(error) = result {
        eprintln!("failed to install tracing subscriber: {error}");
    }
}

/// Source and target API URLs: job `sites` > MIRROR_*_API_URL > config file.
fn api_urls(job: &CompiledJob, config: &MirrorConfig, path: &Path) -> Result<(String, String)> {
    let Some(source_url) = job.source_api_url.clone().or_else(|| config.source_api_url()) else {
        bail!(
            "no source API URL: set sites.source.api_url in {}, MIRROR_SOURCE_API_URL or [source] api_url",
            path.display()
        );
    };
    let Some(target_url) = job.target_api_url.clone().or_else(|| config.target_api_url()) else {
        bail!(
            "no target API URL: set sites.target.api_url in {}, MIRROR_TARGET_API_URL or [target] api_url",
            path.display()
        );
    };
    Ok((source_url, target_url))
}

fn run_job(
    cli: &Cli,
    config: &MirrorConfig,
    path: &Path,
    export_root: Option<&Path>,
) -> Result<RunSummary> {
    let job = load_job(path)?
        .compile()
        .with_context(|| format!("invalid job description {}", path.display()))?;
    let (source_url, target_url) = api_urls(&job, config, path)?;

    let flags = cli.run_flags(config);
    let credentials = if flags.modify {
        Some(config.bot_credentials()?)
    } else {
        None
    };
    let mut reader = MediaWikiClient::new(config.client_config(&source_url, &config.source))?;
    let mut writer = MediaWikiClient::new(config.client_config(&target_url, &config.target))?;
    info!(job = %path.display(), source = %source_url, target = %target_url, "starting job");

    let job_name = path.display().to_string();
    let mut summary = match export_root {
        Some(root) => {
            let mut sink = DirectoryExport::create(root)?;
            let mut mirror = MirrorRun::new(&mut reader, &mut writer, flags).with_export(&mut sink);
            mirror.execute(&job_name, &job, credentials.as_ref())?
        }
        None => {
            let mut mirror = MirrorRun::new(&mut reader, &mut writer, flags);
            mirror.execute(&job_name, &job, credentials.as_ref())?
        }
    };
    summary.export_dir = export_root.map(Path::to_path_buf);
    Ok(summary)
}

/// Several jobs get one export subdirectory each, named after the job file.
fn export_root_for(base: Option<&Path>, job: &Path, job_count: usize) -> Option<PathBuf> {
    let base = base?;
    if job_count <= 1 {
        return Some(base.to_path_buf());
    }
    let stem = job
        .file_stem()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    Some(base.join(stem))
}

fn print_summary(summary: &RunSummary) {
    println!("mirror run");
    println!("job: {}", summary.job);
    println!("dry_run: {}", summary.dry_run);
    for kind in [ItemKind::Page, ItemKind::Template, ItemKind::File] {
        let counts = summary.counts(kind);
        println!(
            "{}: fetched={} written={} would_write={} skipped={} failed={} exported={}",
            kind.as_str(),
            counts.fetched,
            counts.written,
            counts.would_write,
            counts.skipped,
            counts.failed,
            counts.exported
        );
    }
    println!("written_pages: {}", summary.written_pages_and_templates());
    println!("uploaded_files: {}", summary.uploaded_files());
    println!("remote_requests: {}", summary.remote_requests);
    println!("local_requests: {}", summary.local_requests);
    if let Some(dir) = &summary.export_dir {
        println!("export_dir: {}", dir.display());
    }
    println!("failures: {}", summary.failure_count());
    for failure in &summary.failures {
        println!(
            "  - {} {}: {}",
            failure.kind.as_str(),
            failure.title,
            failure.reason
        );
    }
}

/// Runs jobs in order until one fails fatally. Summaries of the jobs that
/// finished before the failure are returned alongside it.
fn run_jobs<F>(jobs: &[PathBuf], mut run_one: F) -> (Vec<RunSummary>, Option<anyhow::Error>)
where
    F: FnMut(&Path) -> Result<RunSummary>,
{
    let mut summaries = Vec::with_capacity(jobs.len());
    for path in jobs {
        match run_one(path).with_context(|| format!("job {} failed", path.display())) {
            Ok(summary) => summaries.push(summary),
            Err(error) => return (summaries, Some(error)),
        }
    }
    (summaries, None)
}

fn run(cli: &Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config(&config_path)?.with_env(EnvOverrides::from_process());
    let export_base = cli.export_dir.clone().or_else(|| config.run.export_dir.clone());

    let (summaries, failure) = run_jobs(&cli.jobs, |path| {
        let export_root = export_root_for(export_base.as_deref(), path, cli.jobs.len());
        let summary = run_job(cli, &config, path, export_root.as_deref())?;
        if !cli.json {
            print_summary(&summary);
        }
        Ok(summary)
    });

    if cli.json {
        let rendered =
            serde_json::to_string_pretty(&summaries).context("failed to render run summary")?;
        println!("{rendered}");
    }
    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikimirror_core::job::JobDescription;

    fn compile(json: &str) -> CompiledJob {
        serde_json::from_str::<JobDescription>(json)
            .expect("parse job")
            .compile()
            .expect("compile job")
    }

    fn config_with_env(pairs: &[(&str, &str)]) -> MirrorConfig {
        let mut config = MirrorConfig::default();
        config.source.api_url = Some("https://file.example/w/api.php".to_string());
        config.target.api_url = Some("http://file.local/w/api.php".to_string());
        config.with_env(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    #[test]
    fn template_switch_implies_dependency_switch() {
        let cli = Cli::parse_from(["wikimirror", "-t", "job.json"]);
        let flags = cli.run_flags(&MirrorConfig::default());
        assert!(!flags.sync_templates);
        assert!(!flags.sync_template_dependencies);
        assert!(flags.upload_files);
        assert!(flags.modify);
    }

    #[test]
    fn parses_short_and_long_switches() {
        let cli = Cli::parse_from([
            "wikimirror",
            "-f",
            "-d",
            "-u",
            "--no-modify",
            "-e",
            "out",
            "-vv",
            "a.json",
            "b.yaml",
        ]);
        let flags = cli.run_flags(&MirrorConfig::default());
        assert!(flags.force);
        assert!(flags.sync_templates);
        assert!(!flags.sync_template_dependencies);
        assert!(!flags.upload_files);
        assert!(!flags.modify);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.jobs.len(), 2);
        assert_eq!(cli.export_dir.as_deref(), Some(Path::new("out")));
    }

    #[test]
    fn multiple_jobs_export_into_subdirectories() {
        let base = Path::new("exports");
        assert_eq!(
            export_root_for(Some(base), Path::new("jobs/en.json"), 1),
            Some(PathBuf::from("exports"))
        );
        assert_eq!(
            export_root_for(Some(base), Path::new("jobs/en.json"), 2),
            Some(PathBuf::from("exports/en"))
        );
        assert_eq!(export_root_for(None, Path::new("en.json"), 2), None);
    }

    #[test]
    fn job_sites_win_over_environment_and_config_file() {
        let path = Path::new("job.json");
        let config = config_with_env(&[("MIRROR_SOURCE_API_URL", "https://env.example/w/api.php")]);

        let job = compile(r#"{"pages": ["A"]}"#);
        assert_eq!(
            api_urls(&job, &config, path).expect("urls"),
            (
                "https://env.example/w/api.php".to_string(),
                "http://file.local/w/api.php".to_string()
            )
        );

        let job = compile(
            r#"{"pages": ["A"], "sites": {"source": {"api_url": "https://job.example/w/api.php"}}}"#,
        );
        assert_eq!(
            api_urls(&job, &config, path).expect("urls").0,
            "https://job.example/w/api.php"
        );

        let error = api_urls(&job, &MirrorConfig::default(), path).expect_err("no target");
        assert!(error.to_string().contains("no target API URL"));
    }

    #[test]
    fn fatal_job_error_keeps_earlier_summaries() {
        let jobs = vec![
            PathBuf::from("a.json"),
            PathBuf::from("b.json"),
            PathBuf::from("c.json"),
        ];
        let mut attempted = Vec::new();
        let (summaries, failure) = run_jobs(&jobs, |path| {
            attempted.push(path.to_path_buf());
            if path == Path::new("b.json") {
                bail!("source wiki is not reachable");
            }
            Ok(RunSummary::new(&path.display().to_string(), false))
        });

        assert_eq!(attempted.len(), 2);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].job, "a.json");
        let error = failure.expect("fatal error");
        assert_eq!(error.to_string(), "job b.json failed");
        assert!(format!("{error:#}").contains("source wiki is not reachable"));

        let (summaries, failure) = run_jobs(&jobs, |path| {
            Ok(RunSummary::new(&path.display().to_string(), true))
        });
        assert_eq!(summaries.len(), 3);
        assert!(failure.is_none());
    }
}
