//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use harvester_core::{JsonFileSink, Orchestrator, PlanBuilder, PlanContext, ProgressReporter};
use harvester_shared::{
    AppConfig, IngestionResult, SourceKind, SourceOutcome, SourceStatus, init_config, load_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Harvester — gather research content from the web, arXiv and PubMed.
#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Plan and run concurrent multi-source content ingestion for a topic.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch, deduplicate and filter content for a topic.
    Run {
        /// Research topic, or a direct URL.
        topic: String,

        #[command(flatten)]
        plan: PlanArgs,

        /// Output format for the result.
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Also write the full result as JSON to this file.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the plan for a topic as JSON without fetching anything.
    Plan {
        /// Research topic, or a direct URL.
        topic: String,

        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Plan knobs shared by `run` and `plan`.
#[derive(Args, Debug, Default)]
pub(crate) struct PlanArgs {
    /// Sources to query, in priority order (web, academic/arxiv,
    /// biomedical/pubmed). Repeatable; defaults to all.
    #[arg(short, long = "source")]
    pub sources: Vec<SourceKind>,

    /// Direct URL for the web source. Repeatable.
    #[arg(short, long = "url")]
    pub urls: Vec<String>,

    /// Per-source item cap as kind=n, e.g. academic=20. Repeatable.
    #[arg(short, long = "limit", value_parser = parse_limit)]
    pub limits: Vec<(SourceKind, usize)>,

    /// Minimum quality score in [0, 1].
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Maximum simultaneous adapter calls.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-attempt source timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Wall-clock budget for the whole plan in seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// arXiv category, e.g. q-bio.NC. Repeatable.
    #[arg(long = "category")]
    pub categories: Vec<String>,

    /// PubMed MeSH term. Repeatable.
    #[arg(long = "mesh")]
    pub mesh_terms: Vec<String>,
}

impl PlanArgs {
    fn into_context(self) -> PlanContext {
        PlanContext {
            sources: self.sources,
            limits: self.limits.into_iter().collect::<BTreeMap<_, _>>(),
            quality_threshold: self.threshold,
            max_concurrency: self.concurrency,
            timeout_secs: self.timeout_secs,
            deadline_secs: self.deadline_secs,
            urls: self.urls,
            categories: self.categories,
            mesh_terms: self.mesh_terms,
            render_delay_ms: None,
        }
    }
}

fn parse_limit(s: &str) -> std::result::Result<(SourceKind, usize), String> {
    let (kind, n) = s
        .split_once('=')
        .ok_or_else(|| format!("expected kind=n, got '{s}'"))?;
    let kind: SourceKind = kind.parse().map_err(|e| format!("{e}"))?;
    let n: usize = n
        .trim()
        .parse()
        .map_err(|e| format!("invalid limit '{n}': {e}"))?;
    Ok((kind, n))
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "harvester=info",
        1 => "harvester=debug",
        _ => "harvester=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            topic,
            plan,
            format,
            out,
        } => cmd_run(&topic, plan, format, out).await,
        Command::Plan { topic, plan } => cmd_plan(&topic, plan).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

async fn cmd_run(
    topic: &str,
    args: PlanArgs,
    format: OutputFormat,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let ctx = args.into_context();

    let mut orchestrator = Orchestrator::from_config(&config)?;
    if let Some(path) = &out {
        orchestrator = orchestrator.with_sink(Arc::new(JsonFileSink::new(path)));
    }

    // Plan errors surface before anything is fetched
    let plan = orchestrator.planner().build(topic, &ctx)?;
    info!(
        plan_id = %plan.id,
        sources = plan.sources.len(),
        "running ingestion plan"
    );

    let reporter = CliProgress::new();
    let result = orchestrator.execute_with_progress(&plan, &reporter).await;
    reporter.finish();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_summary(&result),
    }
    if let Some(notice) = out.as_deref().and_then(|path| saved_notice(format, path)) {
        println!("{notice}");
    }

    if !result.success {
        return Err(eyre!("every source failed for topic '{topic}'"));
    }
    Ok(())
}

async fn cmd_plan(topic: &str, args: PlanArgs) -> Result<()> {
    let config = load_config()?;
    let plan = PlanBuilder::from_config(&config).build(topic, &args.into_context())?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Stdout line naming the saved result file. JSON output stays a single
/// document on stdout, so there the path only goes to the log.
fn saved_notice(format: OutputFormat, path: &std::path::Path) -> Option<String> {
    match format {
        OutputFormat::Text => Some(format!("  Saved:  {}", path.display())),
        OutputFormat::Json => {
            info!(path = %path.display(), "result saved");
            None
        }
    }
}

fn status_line(kind: SourceKind, status: &SourceStatus) -> String {
    let attempts = match status.attempts {
        1 => "1 attempt".to_string(),
        n => format!("{n} attempts"),
    };
    match status.outcome {
        SourceOutcome::Success => format!("✓ {kind}: {} items ({attempts})", status.item_count),
        SourceOutcome::Partial => format!(
            "~ {kind}: {} items ({attempts}), partial: {}",
            status.item_count,
            status.note.as_deref().unwrap_or("incomplete")
        ),
        SourceOutcome::Failed => match &status.error {
            Some(err) => format!("✗ {kind}: {} after {attempts}: {}", err.kind, err.message),
            None => format!("✗ {kind}: failed after {attempts}"),
        },
    }
}

fn print_summary(result: &IngestionResult) {
    println!();
    println!("  Topic:  {}", result.topic);
    println!("  Plan:   {}", result.plan_id);
    println!("  State:  {:?}", result.state);
    println!("  Items:  {}", result.items.len());
    println!("  Time:   {:.1}s", result.total_duration.as_secs_f64());
    println!();
    for (kind, status) in &result.per_source_status {
        println!("  {}", status_line(*kind, status));
    }
    if !result.items.is_empty() {
        println!();
    }
    for (i, item) in result.items.iter().enumerate() {
        let score = item.quality_score.unwrap_or_default();
        println!("  {:>3}. [{}] {} ({score:.2})", i + 1, item.source, item.title);
        println!("       {}", item.url_or_identifier);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_dispatched(&self, kind: SourceKind) {
        self.spinner.set_message(format!("Fetching {kind}"));
    }

    fn source_finished(&self, kind: SourceKind, status: &SourceStatus) {
        self.spinner.println(format!("  {}", status_line(kind, status)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_plan_flags() {
        let cli = Cli::try_parse_from([
            "harvester",
            "run",
            "gut microbiome",
            "--source",
            "pubmed",
            "--source",
            "web",
            "--url",
            "https://example.com/a",
            "--limit",
            "biomedical=8",
            "--limit",
            "web=2",
            "--threshold",
            "0.4",
            "--mesh",
            "Microbiota",
            "--format",
            "json",
        ])
        .unwrap();

        let Command::Run {
            topic,
            plan,
            format,
            out,
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(topic, "gut microbiome");
        assert_eq!(format, OutputFormat::Json);
        assert!(out.is_none());

        let ctx = plan.into_context();
        assert_eq!(ctx.sources, vec![SourceKind::Biomedical, SourceKind::Web]);
        assert_eq!(ctx.limits.get(&SourceKind::Biomedical), Some(&8));
        assert_eq!(ctx.limits.get(&SourceKind::Web), Some(&2));
        assert_eq!(ctx.quality_threshold, Some(0.4));
        assert_eq!(ctx.mesh_terms, vec!["Microbiota"]);
    }

    #[test]
    fn rejects_malformed_limits() {
        assert!(parse_limit("academic").is_err());
        assert!(parse_limit("podcasts=3").is_err());
        assert!(parse_limit("academic=many").is_err());
        assert_eq!(parse_limit("arxiv=20").unwrap(), (SourceKind::Academic, 20));
    }

    #[test]
    fn plan_context_builds_offline() {
        let args = PlanArgs {
            sources: vec![SourceKind::Academic],
            categories: vec!["q-bio.NC".into()],
            ..Default::default()
        };
        let plan = PlanBuilder::default()
            .build("vagus nerve signalling", &args.into_context())
            .unwrap();
        assert_eq!(plan.sources.len(), 1);
        assert_eq!(plan.sources[0].kind(), SourceKind::Academic);
    }

    #[test]
    fn saved_notice_stays_off_stdout_for_json() {
        let path = PathBuf::from("out/result.json");
        assert_eq!(
            saved_notice(OutputFormat::Text, &path).as_deref(),
            Some("  Saved:  out/result.json")
        );
        assert!(saved_notice(OutputFormat::Json, &path).is_none());
    }

    #[test]
    fn status_lines_describe_outcomes() {
        let ok = SourceStatus::succeeded(3, 1, None);
        assert_eq!(status_line(SourceKind::Academic, &ok), "✓ academic: 3 items (1 attempt)");

        let failed = SourceStatus::failed(
            &harvester_shared::SourceError::Timeout("no response within 30000ms".into()),
            4,
        );
        assert_eq!(
            status_line(SourceKind::Web, &failed),
            "✗ web: timeout after 4 attempts: no response within 30000ms"
        );
    }
}
