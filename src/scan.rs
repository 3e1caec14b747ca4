use crate::config::Config;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Content heuristics the risk classifier consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentScan {
    pub import_count: u32,
    pub keyword_hits: Vec<String>,
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*import\b|\brequire\s*\(").expect("static import regex")
    })
}

/// Scans a file under `repo_root`. An unreadable file scans as empty.
pub fn scan_file(cfg: &Config, repo_root: &Path, rel_path: &str) -> ContentScan {
    let path = repo_root.join(rel_path);
    match std::fs::read_to_string(&path) {
        Ok(raw) => scan_content(cfg, &raw),
        Err(err) => {
            debug!("scan skipped for {}: {err}", path.display());
            ContentScan::default()
        }
    }
}

pub fn scan_content(cfg: &Config, content: &str) -> ContentScan {
    let import_count = import_re().find_iter(content).count() as u32;
    let lower = content.to_ascii_lowercase();
    let keyword_hits = cfg
        .risk
        .domain_keywords
        .iter()
        .filter(|k| !k.is_empty() && lower.contains(&k.to_ascii_lowercase()))
        .cloned()
        .collect();
    ContentScan {
        import_count,
        keyword_hits,
    }
}
