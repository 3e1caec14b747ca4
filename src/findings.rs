use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Eliminate,
    Preserve,
}

/// One flagged symbol reported by the upstream analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    pub symbol: String,
    pub line: u32,   // 1-based
    pub column: u32, // 1-based
    pub decision: Decision,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FindingsDoc {
    List(Vec<Finding>),
    Wrapped { findings: Vec<Finding> },
}

pub fn parse(raw: &str) -> Result<Vec<Finding>> {
    let doc: FindingsDoc = serde_json::from_str(raw)?;
    let mut findings = match doc {
        FindingsDoc::List(v) => v,
        FindingsDoc::Wrapped { findings } => findings,
    };
    for f in &mut findings {
        f.file = normalize_path(&f.file);
        if f.file.is_empty() {
            return Err(anyhow!("finding for symbol {:?} has an empty file", f.symbol));
        }
        if f.symbol.trim().is_empty() {
            return Err(anyhow!("finding in {} has an empty symbol", f.file));
        }
        if f.line == 0 {
            return Err(anyhow!("finding {} in {} has line 0", f.symbol, f.file));
        }
        if !(0.0..=1.0).contains(&f.confidence) {
            return Err(anyhow!(
                "finding {} in {} has confidence outside [0, 1]: {}",
                f.symbol,
                f.file,
                f.confidence
            ));
        }
    }
    Ok(findings)
}

/// Groups findings per file; keys are in path order.
pub fn group_by_file(findings: &[Finding]) -> BTreeMap<String, Vec<Finding>> {
    let mut out: BTreeMap<String, Vec<Finding>> = BTreeMap::new();
    for f in findings {
        out.entry(f.file.clone()).or_default().push(f.clone());
    }
    out
}

pub fn normalize_path(p: &str) -> String {
    let s = p.trim().replace('\\', "/");
    let mut s = s.as_str();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}
