//! Consumed-key registry and unused-key report.
//!
//! "Consumed pointers" are JSON Pointer prefixes. A leaf under any consumed
//! prefix is consumed; any other leaf is unused. Keep the registry to what
//! the code actually reads.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{PTR_JOURNAL_HASH_CHAIN, PTR_RUN_TIMEOUT_MS, PTR_TRANSFER_DEBT_CEILING};

/// Every pointer read by [`crate::ProtocolConfig::from_config_json`].
pub const CONSUMED_POINTERS: &[&str] = &[
    PTR_TRANSFER_DEBT_CEILING,
    PTR_RUN_TIMEOUT_MS,
    PTR_JOURNAL_HASH_CHAIN,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Consumed prefixes used for this analysis (sorted, unique).
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted).
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report leaves not covered by [`CONSUMED_POINTERS`].
///
/// With `Fail`, unused keys are an error; with `Warn`, the report is always
/// returned for the caller to log.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = CONSUMED_POINTERS
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s) detected. \
            Remove them or update the consumed registry. First few: {:?}",
            report.unused_leaf_pointers.len(),
            report.unused_leaf_pointers.iter().take(12).collect::<Vec<_>>()
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

pub(crate) fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}
