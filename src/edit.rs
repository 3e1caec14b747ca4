//! Per-file source transformation.
//!
//! Confirmed-unused symbols are removed (import specifiers, including those of
//! multi-line clauses, and single-line side-effect-free declarations).
//! Everything else that was flagged is kept and renamed with the preserve
//! prefix so the linter stops reporting it. Import specifiers are aliased
//! (`x as _x`) rather than renamed, so the imported name stays valid.

use crate::{
    config::Config,
    findings::{Decision, Finding},
    risk::FileTask,
};
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub path: String,
    pub eliminated: u32,
    pub preserved: u32,
    pub changed: bool,
    pub notes: Vec<String>,
}

pub struct Editor {
    min_confidence: f32,
    prefix: String,
}

/// Opening line of a brace import clause, with an optional default binding.
fn clause_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*import\s+(?:type\s+)?)(?:([A-Za-z_$][\w$]*)\s*,\s*)?\{")
            .expect("static import regex")
    })
}

fn clause_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\}\s*from\s*['"][^'"]+['"]\s*;?\s*$"#).expect("static import regex")
    })
}

/// Longest import clause searched upward from a finding.
const MAX_CLAUSE_LINES: usize = 200;

fn default_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*import\s+(?:type\s+)?([A-Za-z_$][\w$]*)\s+from\s*['"][^'"]+['"]\s*;?\s*$"#)
            .expect("static import regex")
    })
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(.+);\s*$")
            .expect("static declaration regex")
    })
}

impl Editor {
    pub fn new(cfg: &Config) -> Self {
        Self {
            min_confidence: cfg.editing.min_confidence,
            prefix: cfg.editing.preserve_prefix.clone(),
        }
    }

    /// Applies the task's findings to its file. Nothing is written when any
    /// finding fails to apply, or when `dry_run` is set.
    pub fn apply(&self, repo_root: &Path, task: &FileTask, dry_run: bool) -> Result<EditOutcome> {
        let path = repo_root.join(&task.path);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let (new_content, mut outcome) = self.transform(&content, &task.findings)?;
        outcome.path = task.path.clone();
        outcome.changed = new_content != content;
        if outcome.changed && !dry_run {
            std::fs::write(&path, new_content)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        debug!(
            "edited {} eliminated={} preserved={} dry_run={dry_run}",
            task.path, outcome.eliminated, outcome.preserved
        );
        Ok(outcome)
    }

    pub fn transform(&self, content: &str, findings: &[Finding]) -> Result<(String, EditOutcome)> {
        let mut lines: Vec<Option<String>> = content
            .split_inclusive('\n')
            .map(|l| Some(l.to_string()))
            .collect();
        let mut outcome = EditOutcome::default();

        let mut ordered: Vec<&Finding> = findings.iter().collect();
        ordered.sort_by(|a, b| b.line.cmp(&a.line).then(b.column.cmp(&a.column)));

        for f in ordered {
            let idx = f.line.saturating_sub(1) as usize;
            let slot = lines.get(idx).ok_or_else(|| {
                anyhow!("{}: line {} is past end of file", f.symbol, f.line)
            })?;
            let Some(line) = slot.clone() else {
                if f.decision == Decision::Eliminate {
                    outcome.eliminated += 1;
                }
                continue;
            };
            let (body, eol) = split_eol(&line);
            if find_ident(body, &f.symbol, f.column).is_none() {
                return Err(anyhow!(
                    "{} not found on line {}; file changed since analysis",
                    f.symbol,
                    f.line
                ));
            }

            let eliminate = f.decision == Decision::Eliminate && f.confidence >= self.min_confidence;
            if f.decision == Decision::Eliminate && !eliminate {
                outcome.notes.push(format!(
                    "{}:{} confidence {:.2} below threshold; prefixed instead",
                    f.symbol, f.line, f.confidence
                ));
            }

            if let Some(clause) = find_clause(&lines, idx) {
                if eliminate && eliminate_in_clause(&mut lines, clause, idx, &f.symbol) {
                    outcome.eliminated += 1;
                    continue;
                }
                if self.preserve_in_clause(&mut lines, clause, idx, &f.symbol) {
                    outcome.preserved += 1;
                    continue;
                }
            }

            if eliminate {
                if removable_line(body, &f.symbol) {
                    lines[idx] = None;
                    outcome.eliminated += 1;
                    continue;
                }
                outcome.notes.push(format!(
                    "{}:{} could not be removed safely; prefixed instead",
                    f.symbol, f.line
                ));
            }

            let rewritten = self.preserve_on_line(body, &f.symbol, f.column);
            lines[idx] = Some(format!("{rewritten}{eol}"));
            outcome.preserved += 1;
        }

        let out: String = lines.into_iter().flatten().collect();
        Ok((out, outcome))
    }

    fn preserve_on_line(&self, body: &str, symbol: &str, column: u32) -> String {
        if self.prefix.is_empty() || symbol.starts_with(&self.prefix) {
            return body.to_string();
        }
        match find_ident(body, symbol, column) {
            Some(at) => format!("{}{}{}", &body[..at], self.prefix, &body[at..]),
            None => body.to_string(),
        }
    }

    /// Aliases the binding inside an import clause, so the imported name stays valid.
    /// Returns false when `symbol` is not a specifier on line `idx`.
    fn preserve_in_clause(
        &self,
        lines: &mut [Option<String>],
        clause: (usize, usize),
        idx: usize,
        symbol: &str,
    ) -> bool {
        let Some(line) = lines[idx].clone() else {
            return false;
        };
        let (body, eol) = split_eol(&line);
        let (from, to) = clause_segment(body, idx == clause.0, idx == clause.1);
        let mut pieces: Vec<String> = body[from..to].split(',').map(str::to_string).collect();
        let Some(hit) = pieces.iter().position(|p| specifier_binds(p.trim(), symbol)) else {
            return false;
        };
        if self.prefix.is_empty() || symbol.starts_with(&self.prefix) {
            return true;
        }

        let piece = &pieces[hit];
        let lead = &piece[..piece.len() - piece.trim_start().len()];
        let trail = &piece[piece.trim_end().len()..];
        let spec = piece.trim();
        let aliased = match spec.split_once(" as ") {
            Some((imported, local)) => format!("{imported} as {}{}", self.prefix, local.trim()),
            None => format!("{spec} as {}{symbol}", self.prefix),
        };
        pieces[hit] = format!("{lead}{aliased}{trail}");
        lines[idx] = Some(format!(
            "{}{}{}{eol}",
            &body[..from],
            pieces.join(","),
            &body[to..]
        ));
        true
    }
}

/// Line span `(first, last)` of the `import { ... } from '...'` clause containing line `idx`.
fn find_clause(lines: &[Option<String>], idx: usize) -> Option<(usize, usize)> {
    let mut start = None;
    for i in (idx.saturating_sub(MAX_CLAUSE_LINES)..=idx).rev() {
        let Some(line) = &lines[i] else { continue };
        if clause_open_re().is_match(line) {
            start = Some(i);
            break;
        }
        if i < idx && (line.contains(';') || line.contains('}')) {
            return None;
        }
    }
    let start = start?;
    for (j, line) in lines.iter().enumerate().skip(start) {
        let Some(line) = line else { continue };
        if line.contains('}') {
            let closes = clause_close_re().is_match(split_eol(line).0);
            return (closes && j >= idx).then_some((start, j));
        }
    }
    None
}

/// Byte range of the specifier list on one line of a clause.
fn clause_segment(body: &str, first: bool, last: bool) -> (usize, usize) {
    let from = if first {
        body.find('{').map_or(0, |i| i + 1)
    } else {
        0
    };
    let to = if last {
        body.rfind('}').unwrap_or(body.len())
    } else {
        body.len()
    };
    (from, to.max(from))
}

/// Removes `symbol` from the clause. Returns false when it is not a specifier on line `idx`.
fn eliminate_in_clause(
    lines: &mut [Option<String>],
    clause: (usize, usize),
    idx: usize,
    symbol: &str,
) -> bool {
    let Some(line) = lines[idx].clone() else {
        return false;
    };
    let (body, eol) = split_eol(&line);
    let (first, last) = (idx == clause.0, idx == clause.1);
    let (from, to) = clause_segment(body, first, last);
    let mut pieces: Vec<&str> = body[from..to].split(',').collect();
    let Some(hit) = pieces.iter().position(|p| specifier_binds(p.trim(), symbol)) else {
        return false;
    };
    pieces.remove(hit);

    if first && last {
        let kept: Vec<&str> = pieces
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        lines[idx] = Some(format!(
            "{}{{ {} }}{}{eol}",
            body[..from].trim_end_matches('{'),
            kept.join(", "),
            &body[to..].trim_start_matches('}')
        ));
    } else {
        let seg = pieces.join(",");
        if !first && !last && seg.trim().trim_matches(',').trim().is_empty() {
            lines[idx] = None;
        } else {
            lines[idx] = Some(format!("{}{seg}{}{eol}", &body[..from], &body[to..]));
        }
    }

    if clause_is_empty(lines, clause) {
        drop_clause(lines, clause);
    }
    true
}

fn clause_is_empty(lines: &[Option<String>], (start, end): (usize, usize)) -> bool {
    (start..=end).all(|k| {
        let Some(line) = &lines[k] else { return true };
        let body = split_eol(line).0;
        let (from, to) = clause_segment(body, k == start, k == end);
        body[from..to].split(',').all(|p| p.trim().is_empty())
    })
}

/// Removes an emptied clause, keeping a default binding if the import has one.
fn drop_clause(lines: &mut [Option<String>], (start, end): (usize, usize)) {
    let default_import = lines[start].as_deref().and_then(|open| {
        let caps = clause_open_re().captures(open)?;
        let binding = caps.get(2)?.as_str();
        let close = lines[end].as_deref()?;
        let (close_body, eol) = split_eol(close);
        let tail = &close_body[close_body.rfind('}')? + 1..];
        Some(format!("{}{binding} {}{eol}", &caps[1], tail.trim_start()))
    });
    for slot in &mut lines[start..=end] {
        *slot = None;
    }
    lines[start] = default_import;
}

/// True when the whole line is a default import or an effect-free
/// declaration of `symbol`.
fn removable_line(body: &str, symbol: &str) -> bool {
    if let Some(caps) = default_import_re().captures(body) {
        return &caps[1] == symbol;
    }
    match declaration_re().captures(body) {
        Some(caps) => {
            let rhs = &caps[2];
            let has_effects = rhs.contains('(') || rhs.contains("await") || rhs.contains("new ");
            &caps[1] == symbol && !has_effects
        }
        None => false,
    }
}

fn specifier_binds(spec: &str, symbol: &str) -> bool {
    let spec = spec.strip_prefix("type ").unwrap_or(spec).trim();
    match spec.split_once(" as ") {
        Some((_, local)) => local.trim() == symbol,
        None => spec == symbol,
    }
}

fn split_eol(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Byte offset of `symbol` as a whole identifier, preferring the 1-based
/// character `column`.
fn find_ident(body: &str, symbol: &str, column: u32) -> Option<usize> {
    let bounded = |at: usize| {
        let before = body[..at].chars().next_back();
        let after = body[at + symbol.len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    };

    let hinted = body
        .char_indices()
        .nth(column.saturating_sub(1) as usize)
        .map(|(i, _)| i);
    if let Some(at) = hinted {
        if body[at..].starts_with(symbol) && bounded(at) {
            return Some(at);
        }
    }
    body.match_indices(symbol).map(|(i, _)| i).find(|&i| bounded(i))
}
