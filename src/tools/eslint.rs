use super::{
    LintPort,
    process::run_command,
    types::LintSummary,
};
use crate::{config::Config, findings::normalize_path};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResult {
    file_path: String,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    #[serde(default)]
    rule_id: Option<String>,
}

pub struct EslintRunner {
    command: Vec<String>,
    repo_root: PathBuf,
    timeout: Option<Duration>,
    unused_rules: Vec<String>,
}

impl EslintRunner {
    pub fn new(cfg: &Config, repo_root: &Path) -> Self {
        Self {
            command: cfg.lint.command.clone(),
            repo_root: repo_root.to_path_buf(),
            timeout: (cfg.lint.timeout_seconds > 0)
                .then(|| Duration::from_secs(cfg.lint.timeout_seconds)),
            unused_rules: cfg.lint.unused_rules.clone(),
        }
    }
}

impl LintPort for EslintRunner {
    fn unused_summary(&self) -> Result<LintSummary> {
        info!("linting: {}", self.command.join(" "));
        // eslint exits 1 whenever it reports problems, so only the JSON matters.
        let output = run_command(&self.command, &self.repo_root, self.timeout)?;
        let raw = String::from_utf8_lossy(&output.stdout);
        let summary = parse_eslint_json(&raw, &self.unused_rules, &self.repo_root)
            .with_context(|| "parsing eslint JSON output")?;
        info!(
            "lint unused={} files={}",
            summary.total_unused, summary.files_with_unused
        );
        Ok(summary)
    }
}

pub fn parse_eslint_json(raw: &str, unused_rules: &[String], repo_root: &Path) -> Result<LintSummary> {
    let results: Vec<FileResult> = serde_json::from_str(raw.trim())?;
    let root = repo_root.canonicalize().unwrap_or_else(|_| repo_root.to_path_buf());
    let mut summary = LintSummary::default();
    for file in results {
        summary.total_messages += file.messages.len() as u32;
        let unused = file
            .messages
            .iter()
            .filter(|m| {
                m.rule_id
                    .as_deref()
                    .is_some_and(|r| unused_rules.iter().any(|u| u == r))
            })
            .count() as u32;
        if unused == 0 {
            continue;
        }
        let rel = Path::new(&file.file_path)
            .strip_prefix(&root)
            .map(|p| p.display().to_string())
            .unwrap_or(file.file_path.clone());
        summary.total_unused += unused;
        summary.files_with_unused += 1;
        summary.per_file.insert(normalize_path(&rel), unused);
    }
    Ok(summary)
}
