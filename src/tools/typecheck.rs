use super::{
    ValidationPort,
    process::{combined_output, run_command},
    types::{UNPARSED, ValidationResult},
};
use crate::{config::Config, util::truncate_tail};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs the project type-checker over the whole tree.
pub struct TypecheckRunner {
    command: Vec<String>,
    repo_root: PathBuf,
    timeout: Option<Duration>,
    code_re: Regex,
    max_raw: usize,
    keep_stderr: bool,
}

impl TypecheckRunner {
    pub fn new(cfg: &Config, repo_root: &Path) -> Result<Self> {
        Ok(Self {
            command: cfg.validation.command.clone(),
            repo_root: repo_root.to_path_buf(),
            timeout: (cfg.validation.timeout_seconds > 0)
                .then(|| Duration::from_secs(cfg.validation.timeout_seconds)),
            code_re: Regex::new(&cfg.validation.error_code_pattern)?,
            max_raw: cfg.validation.max_raw_output_bytes,
            keep_stderr: cfg.debug.keep_tool_stderr,
        })
    }
}

impl ValidationPort for TypecheckRunner {
    fn validate(&self) -> ValidationResult {
        info!("validating: {}", self.command.join(" "));
        let output = match run_command(&self.command, &self.repo_root, self.timeout) {
            Ok(o) => o,
            Err(err) => {
                warn!("validation tool failed to run: {err:#}");
                return ValidationResult::execution_failure(format!("{err:#}"));
            }
        };
        if self.keep_stderr && !output.stderr.is_empty() {
            debug!(
                "validation stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let raw = combined_output(&output);
        let mut res = parse_diagnostics(&self.code_re, &raw, output.status.success());
        res.raw_output = truncate_tail(&res.raw_output, self.max_raw);
        info!(
            "validation passed={} errors={}",
            res.passed, res.error_count
        );
        res
    }
}

/// Builds a result from compiler output. `code_re` must capture the code in group 1.
pub fn parse_diagnostics(code_re: &Regex, raw: &str, exit_ok: bool) -> ValidationResult {
    let mut categorized_errors: BTreeMap<String, usize> = BTreeMap::new();
    for caps in code_re.captures_iter(raw) {
        let code = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| UNPARSED.to_string());
        *categorized_errors.entry(code).or_insert(0) += 1;
    }
    if !exit_ok && categorized_errors.is_empty() {
        categorized_errors.insert(UNPARSED.to_string(), 1);
    }
    let error_count = categorized_errors.values().sum();
    ValidationResult {
        passed: exit_ok && error_count == 0,
        error_count,
        categorized_errors,
        raw_output: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re() -> Regex {
        Regex::new(&Config::default().validation.error_code_pattern).unwrap()
    }

    #[test]
    fn clean_output_passes() {
        let res = parse_diagnostics(&re(), "", true);
        assert!(res.passed);
        assert_eq!(res.error_count, 0);
    }

    #[test]
    fn histogram_counts_codes() {
        let raw = "src/a.ts(3,7): error TS6133: 'x' is declared but never used.\n\
                   src/b.ts(9,1): error TS2304: Cannot find name 'y'.\n\
                   src/c.ts(1,1): error TS6133: 'z' is declared but never used.\n";
        let res = parse_diagnostics(&re(), raw, false);
        assert!(!res.passed);
        assert_eq!(res.error_count, 3);
        assert_eq!(res.categorized_errors.get("TS6133"), Some(&2));
        assert_eq!(res.categorized_errors.get("TS2304"), Some(&1));
    }

    #[test]
    fn failing_exit_without_codes_is_unparsed() {
        let res = parse_diagnostics(&re(), "segmentation fault", false);
        assert!(!res.passed);
        assert_eq!(res.categorized_errors.get(UNPARSED), Some(&1));
    }

    #[test]
    fn missing_tool_is_execution_failure() {
        let mut cfg = Config::default();
        cfg.validation.command = vec!["definitely-not-a-real-typechecker-bin".into()];
        let dir = tempfile::tempdir().unwrap();
        let runner = TypecheckRunner::new(&cfg, dir.path()).unwrap();
        let res = runner.validate();
        assert!(!res.passed);
        assert!(res.categorized_errors.contains_key(super::super::types::EXECUTION_FAILURE));
    }

    #[cfg(unix)]
    #[test]
    fn hung_checker_times_out_as_execution_failure() {
        let mut cfg = Config::default();
        cfg.validation.command = vec!["sh".into(), "-c".into(), "sleep 6; true".into()];
        cfg.validation.timeout_seconds = 1;
        let dir = tempfile::tempdir().unwrap();
        let runner = TypecheckRunner::new(&cfg, dir.path()).unwrap();
        let started = std::time::Instant::now();
        let res = runner.validate();
        assert!(!res.passed);
        assert!(res.categorized_errors.contains_key(super::super::types::EXECUTION_FAILURE));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
