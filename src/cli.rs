use crate::{
    campaign::{Campaign, Progress, campaign_id},
    config::Config,
    findings,
    report::render_markdown,
    review::{ApprovalRecord, ApprovalStore, ReviewDecision, ReviewPrompt, StdinPrompt},
    tools::{
        self, LintPort, SnapshotPort, eslint::EslintRunner, files::FileSnapshotPort,
        typecheck::TypecheckRunner,
    },
    util::{ensure_dir, write_json},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "safe-batch")]
#[command(about = "Batched, validated, rollback-safe cleanup campaigns over a source tree")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./safe-batch.toml if present, else defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override paths.repo_root.
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that git, the type-checker and the linter can be run.
    Doctor {},
    /// Print the risk assessment of every file in a findings list.
    Classify {
        #[arg(long)]
        findings: PathBuf,
    },
    /// Print the review split and batch plan without touching files.
    Plan {
        #[arg(long)]
        findings: PathBuf,
    },
    /// Record or list manual review decisions.
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Execute a campaign.
    Run {
        #[arg(long)]
        findings: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Compute edits and reports without writing files.
        #[arg(long)]
        dry_run: bool,
        /// Prompt for files that need manual review.
        #[arg(long)]
        interactive: bool,
    },
    /// List snapshots left behind by earlier runs.
    Snapshots {},
    /// Count unused-symbol lint diagnostics.
    Monitor {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReviewAction {
    /// Files in the findings list still waiting for a decision.
    Pending {
        #[arg(long)]
        findings: PathBuf,
    },
    Approve {
        path: String,
        #[arg(long)]
        note: Option<String>,
    },
    Reject {
        path: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Print all recorded decisions.
    List {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let mut cfg = match &cfg_path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    if let Some(repo) = &args.repo {
        cfg.paths.repo_root = repo.display().to_string();
    }

    match &args.cmd {
        Command::Run {
            findings,
            out_dir,
            dry_run,
            interactive,
        } => {
            cfg.global.dry_run |= *dry_run;
            cfg.review.interactive |= *interactive;
            run(&args, &cfg, findings, out_dir.as_deref())
        }
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            doctor(&cfg)
        }
        Command::Classify { findings } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            classify(&cfg, findings)
        }
        Command::Plan { findings } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            plan(&cfg, findings)
        }
        Command::Review { action } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            review(&cfg, action)
        }
        Command::Snapshots {} => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            snapshots(&cfg)
        }
        Command::Monitor { top } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            monitor(&cfg, *top)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("safe-batch.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config, campaign_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(dir) = campaign_dir {
        return Some(dir.join("logs").join("safe-batch.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("safe-batch.log"))
}

fn repo_root(cfg: &Config) -> Result<PathBuf> {
    let root = PathBuf::from(&cfg.paths.repo_root);
    root.canonicalize()
        .with_context(|| format!("repo_root does not exist: {}", root.display()))
}

fn load_findings(path: &Path) -> Result<(Vec<u8>, Vec<findings::Finding>)> {
    let raw = std::fs::read(path).with_context(|| format!("reading findings: {}", path.display()))?;
    let text = std::str::from_utf8(&raw).with_context(|| "findings are not UTF-8")?;
    let parsed = findings::parse(text).with_context(|| format!("parsing findings: {}", path.display()))?;
    Ok((raw, parsed))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    let report = tools::doctor(cfg, &repo_root(cfg)?);
    print_json(&report)?;
    if !report.ok {
        return Err(anyhow!("doctor found problems"));
    }
    Ok(())
}

fn classify(cfg: &Config, findings_path: &Path) -> Result<()> {
    let (_, findings) = load_findings(findings_path)?;
    let campaign = Campaign::new(cfg, &repo_root(cfg)?, "classify", ApprovalStore::in_memory());
    let tasks = campaign.classify(&findings)?;
    let rows: Vec<_> = tasks
        .iter()
        .map(|t| {
            serde_json::json!({
                "path": t.path,
                "risk_tier": t.risk_tier,
                "file_kind": t.file_kind,
                "flagged_count": t.flagged_count,
                "factors": t.factors,
                "mitigations": t.mitigations,
            })
        })
        .collect();
    print_json(&rows)
}

fn plan(cfg: &Config, findings_path: &Path) -> Result<()> {
    let (_, findings) = load_findings(findings_path)?;
    let approvals = ApprovalStore::load(Path::new(&cfg.paths.approvals_file))?;
    let mut campaign = Campaign::new(cfg, &repo_root(cfg)?, "plan", approvals);
    let plan = campaign.plan(&findings, None)?;
    print_json(&plan.summary())
}

fn review(cfg: &Config, action: &ReviewAction) -> Result<()> {
    let approvals_path = PathBuf::from(&cfg.paths.approvals_file);
    let mut store = ApprovalStore::load(&approvals_path)?;
    match action {
        ReviewAction::Pending { findings } => {
            let (_, parsed) = load_findings(findings)?;
            let mut campaign = Campaign::new(cfg, &repo_root(cfg)?, "review", store);
            let plan = campaign.plan(&parsed, None)?;
            print_json(&plan.review)
        }
        ReviewAction::Approve { path, note } => {
            store.record(ApprovalRecord::new(
                path,
                ReviewDecision::Approve,
                &cfg.review.reviewer,
                note.clone(),
            ));
            store.save()?;
            info!("approvals saved to {}", approvals_path.display());
            Ok(())
        }
        ReviewAction::Reject { path, note } => {
            store.record(ApprovalRecord::new(
                path,
                ReviewDecision::Reject,
                &cfg.review.reviewer,
                note.clone(),
            ));
            store.save()?;
            info!("approvals saved to {}", approvals_path.display());
            Ok(())
        }
        ReviewAction::List {} => print_json(&store.records().collect::<Vec<_>>()),
    }
}

fn snapshots(cfg: &Config) -> Result<()> {
    let port = tools::snapshot_port(cfg, &repo_root(cfg)?)?;
    print_json(&port.list()?)
}

fn monitor(cfg: &Config, top: usize) -> Result<()> {
    let runner = EslintRunner::new(cfg, &repo_root(cfg)?);
    let summary = runner.unused_summary()?;
    let mut worst: Vec<(&String, &u32)> = summary.per_file.iter().collect();
    worst.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    worst.truncate(top);
    print_json(&serde_json::json!({
        "total_unused": summary.total_unused,
        "files_with_unused": summary.files_with_unused,
        "total_messages": summary.total_messages,
        "top_files": worst
            .into_iter()
            .map(|(path, n)| serde_json::json!({"path": path, "unused": n}))
            .collect::<Vec<_>>(),
    }))
}

fn run(args: &Args, cfg: &Config, findings_path: &Path, out_override: Option<&Path>) -> Result<()> {
    let (raw, findings) = load_findings(findings_path)?;
    let id = campaign_id(cfg, &raw);

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let campaign_dir = out_root.join(&id);

    if campaign_dir.exists() && !cfg.global.resume {
        return Err(anyhow!(
            "campaign_dir already exists and resume=false: {}",
            campaign_dir.display()
        ));
    }

    ensure_dir(&campaign_dir)?;
    ensure_dir(&campaign_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, Some(&campaign_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!(
        "campaign_id={id} out={} dry_run={}",
        campaign_dir.display(),
        cfg.global.dry_run
    );

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(campaign_dir.join("effective-config.toml"), raw)?;
    }

    let root = repo_root(cfg)?;
    let progress_path = campaign_dir.join(&cfg.output.progress_filename);
    let previous = if cfg.global.resume {
        Progress::load(&progress_path)?
    } else {
        None
    };

    let approvals = ApprovalStore::load(Path::new(&cfg.paths.approvals_file))?;
    let mut campaign =
        Campaign::new(cfg, &root, &id, approvals).with_progress_file(&progress_path, previous);

    let mut stdin_prompt = StdinPrompt;
    let prompt: Option<&mut dyn ReviewPrompt> = if cfg.review.interactive {
        Some(&mut stdin_prompt)
    } else {
        None
    };
    let plan = campaign.plan(&findings, prompt)?;
    if !plan.review.is_empty() {
        warn!("{} file(s) held for manual review", plan.review.len());
    }

    let validator = TypecheckRunner::new(cfg, &root)?;
    let snapshot_port: Box<dyn SnapshotPort> = if cfg.safety.snapshots && !cfg.global.dry_run {
        tools::snapshot_port(cfg, &root)?
    } else {
        Box::new(FileSnapshotPort::new(&root))
    };
    let lint_runner = (cfg.lint.measure_campaign && !cfg.global.dry_run)
        .then(|| EslintRunner::new(cfg, &root));

    let outcome = campaign.execute(
        &plan,
        &validator,
        snapshot_port.as_ref(),
        lint_runner.as_ref().map(|l| l as &dyn LintPort),
    );
    let report = outcome.report;

    if cfg.output.write_report_json {
        write_json(&campaign_dir.join(&cfg.output.report_filename), &report)?;
    }
    if cfg.output.write_markdown {
        std::fs::write(
            campaign_dir.join(&cfg.output.markdown_filename),
            render_markdown(&report),
        )?;
    }

    let status = match (&outcome.fatal, &report.halted_reason) {
        (Some(_), _) => "fatal",
        (None, Some(_)) => "halted",
        (None, None) => "ok",
    };
    if cfg.global.print_summary {
        print_json(&serde_json::json!({
            "campaign_id": id,
            "campaign_dir": campaign_dir,
            "status": status,
            "batches": report.final_stats.total_batches,
            "success_rate": report.final_stats.success_rate,
            "manual_review_required": report.plan.manual_review_required.len(),
        }))?;
    }

    if let Some(fatal) = outcome.fatal {
        if fatal.requires_manual_intervention() {
            error!(
                "working tree needs inspection; pre-batch state is listed by `safe-batch snapshots`"
            );
        }
        return Err(anyhow::Error::new(fatal).context("campaign terminated"));
    }
    if let Some(reason) = report.halted_reason {
        return Err(anyhow!("campaign halted: {reason}"));
    }
    Ok(())
}
