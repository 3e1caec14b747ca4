use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub batching: Batching,
    #[serde(default)]
    pub risk: Risk,
    #[serde(default)]
    pub review: Review,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub validation: Validation,
    #[serde(default)]
    pub editing: Editing,
    #[serde(default)]
    pub lint: Lint,
    #[serde(default)]
    pub report: Report,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.batching;
        if b.default_batch_size == 0 || b.critical_batch_size == 0 || b.high_risk_batch_size == 0 {
            return Err(anyhow!("batching sizes must be >= 1"));
        }
        if self.validation.enabled && self.validation.command.is_empty() {
            return Err(anyhow!("validation.command is empty while validation.enabled=true"));
        }
        for p in self
            .risk
            .core_patterns
            .iter()
            .chain(&self.risk.service_patterns)
            .chain(&self.risk.test_patterns)
            .chain(std::iter::once(&self.validation.error_code_pattern))
        {
            Regex::new(p).with_context(|| format!("invalid regex in config: {p}"))?;
        }
        match self.safety.snapshot_backend.as_str() {
            "git" | "files" => Ok(()),
            other => Err(anyhow!("unknown safety.snapshot_backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub campaign_name: String,
    pub resume: bool,
    pub dry_run: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            campaign_name: "unused-symbols".into(),
            resume: true,
            dry_run: false,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub repo_root: String,
    pub out_dir: String,
    pub approvals_file: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            repo_root: ".".into(),
            out_dir: ".safe-batch".into(),
            approvals_file: ".safe-batch/approvals.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Batching {
    pub default_batch_size: usize,
    pub critical_batch_size: usize,
    pub high_risk_batch_size: usize,
}
impl Default for Batching {
    fn default() -> Self {
        Self {
            default_batch_size: 15,
            critical_batch_size: 5,
            high_risk_batch_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Risk {
    /// Paths holding core calculation logic; a match is always critical.
    pub core_patterns: Vec<String>,
    /// Service-layer paths; a match is at least high.
    pub service_patterns: Vec<String>,
    pub test_patterns: Vec<String>,
    pub domain_keywords: Vec<String>,
    pub flagged_escalate_one_over: u32,
    pub flagged_escalate_two_over: u32,
    pub max_imports_before_escalation: u32,
}
impl Default for Risk {
    fn default() -> Self {
        Self {
            core_patterns: vec![
                "(^|/)calculations?/".into(),
                "(^|/)core/".into(),
                "(^|/)engines?/".into(),
            ],
            service_patterns: vec!["(^|/)services?/".into(), "(^|/)api/".into()],
            test_patterns: vec![
                "(^|/)(__tests__|tests?)/".into(),
                "\\.(test|spec)\\.[jt]sx?$".into(),
            ],
            domain_keywords: vec![
                "calculate".into(),
                "transform".into(),
                "elemental".into(),
                "planetary".into(),
            ],
            flagged_escalate_one_over: 10,
            flagged_escalate_two_over: 20,
            max_imports_before_escalation: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    /// Flagged-symbol count above which a file always needs approval.
    pub auto_process_ceiling: u32,
    pub interactive: bool,
    pub reviewer: String,
}
impl Default for Review {
    fn default() -> Self {
        Self {
            auto_process_ceiling: 20,
            interactive: false,
            reviewer: "operator".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Safety {
    pub snapshots: bool,
    pub auto_rollback: bool,
    pub snapshot_backend: String,
    pub snapshot_label_prefix: String,
}
impl Default for Safety {
    fn default() -> Self {
        Self {
            snapshots: true,
            auto_rollback: true,
            snapshot_backend: "git".into(),
            snapshot_label_prefix: "safe-batch".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Validation {
    pub enabled: bool,
    pub command: Vec<String>,
    pub timeout_seconds: u64,
    pub compare_to_baseline: bool,
    pub error_code_pattern: String,
    pub max_raw_output_bytes: usize,
}
impl Default for Validation {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["npx".into(), "tsc".into(), "--noEmit".into()],
            timeout_seconds: 600,
            compare_to_baseline: false,
            error_code_pattern: "error\\s+(TS\\d+)\\s*:".into(),
            max_raw_output_bytes: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Editing {
    /// Eliminations below this confidence are applied as preserves instead.
    pub min_confidence: f32,
    pub preserve_prefix: String,
}
impl Default for Editing {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            preserve_prefix: "_".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Lint {
    pub command: Vec<String>,
    pub timeout_seconds: u64,
    pub unused_rules: Vec<String>,
    pub measure_campaign: bool,
}
impl Default for Lint {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".into(),
                "eslint".into(),
                "--format".into(),
                "json".into(),
                ".".into(),
            ],
            timeout_seconds: 900,
            unused_rules: vec![
                "@typescript-eslint/no-unused-vars".into(),
                "no-unused-vars".into(),
            ],
            measure_campaign: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    pub min_success_rate: f64,
    pub min_elimination_rate: f64,
}
impl Default for Report {
    fn default() -> Self {
        Self {
            min_success_rate: 0.9,
            min_elimination_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub write_markdown: bool,
    pub report_filename: String,
    pub markdown_filename: String,
    pub progress_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            write_markdown: true,
            report_filename: "report.json".into(),
            markdown_filename: "report.md".into(),
            progress_filename: "progress.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub keep_tool_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_tool_stderr: true,
            dump_effective_config: true,
        }
    }
}
