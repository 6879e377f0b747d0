//! iou-config
//!
//! Layered YAML configuration for an IOU node.
//!
//! Documents are merged in order (later layers override earlier ones),
//! converted to JSON, refused if any leaf looks like key material, then
//! canonicalized and hashed so that two nodes can compare effective config.
//! Typed settings are read from the merged document by JSON pointer in
//! [`protocol`].

mod consumption;
mod protocol;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub use consumption::{report_unused_keys, UnusedKeyPolicy, UnusedKeyReport, CONSUMED_POINTERS};
pub use protocol::{
    ProtocolConfig, PTR_JOURNAL_HASH_CHAIN, PTR_RUN_TIMEOUT_MS, PTR_TRANSFER_DEBT_CEILING,
};

/// Leaf string prefixes that indicate key material pasted into config.
/// Config must name where a key comes from, never carry the key itself.
const SECRET_PREFIXES: &[&str] = &[
    "-----BEGIN", // PEM private keys
    "seed:",
    "ed25519-priv:",
    "privkey:",
];

/// Leaf names under which a 32-byte hex value is treated as a raw seed.
const SEED_LEAF_HINTS: &[&str] = &["seed", "private_key", "secret"];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed protocol settings, with defaults for absent keys.
    pub fn protocol(&self) -> Result<ProtocolConfig> {
        ProtocolConfig::from_config_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_key_material(&merged)?;

    // serde_json's default map is ordered by key, so this is canonical.
    let canonical_json =
        serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn enforce_no_key_material(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    consumption::collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        let Some(s) = v.pointer(&ptr).and_then(Value::as_str) else {
            continue;
        };
        if looks_like_key_material(&ptr, s) {
            bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
        }
    }
    Ok(())
}

fn looks_like_key_material(ptr: &str, s: &str) -> bool {
    let t = s.trim();
    if SECRET_PREFIXES.iter().any(|p| t.starts_with(p)) {
        return true;
    }
    let leaf = ptr.rsplit('/').next().unwrap_or("").to_ascii_lowercase();
    let hinted = SEED_LEAF_HINTS.iter().any(|h| leaf.contains(h));
    hinted && t.len() == 64 && t.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layer_overrides_and_keeps_siblings() {
        let base = "acceptor:\n  transfer_debt_ceiling: 100\njournal:\n  hash_chain: true\n";
        let overlay = "acceptor:\n  transfer_debt_ceiling: 250\n";
        let loaded = load_layered_yaml_from_strings(&[base, overlay]).unwrap();
        assert_eq!(
            loaded.config_json.pointer("/acceptor/transfer_debt_ceiling"),
            Some(&serde_json::json!(250))
        );
        assert_eq!(
            loaded.config_json.pointer("/journal/hash_chain"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn raw_seed_under_hinted_leaf_is_refused() {
        let yaml = format!("node:\n  signing_seed: \"{}\"\n", "ab".repeat(32));
        let err = load_layered_yaml_from_strings(&[&yaml]).unwrap_err();
        assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
        assert!(!err.to_string().contains("abab"), "value must be redacted");
    }

    #[test]
    fn hex_under_plain_leaf_is_allowed() {
        let yaml = format!("node:\n  owning_key: \"{}\"\n", "ab".repeat(32));
        assert!(load_layered_yaml_from_strings(&[&yaml]).is_ok());
    }

    #[test]
    fn env_var_name_is_allowed() {
        let yaml = "node:\n  signing_seed_env: \"IOU_NODE_SEED\"\n";
        assert!(load_layered_yaml_from_strings(&[yaml]).is_ok());
    }
}
