//! Typed protocol settings read from the merged config.

use std::time::Duration;

use anyhow::{bail, Result};
use iou_contract::{AcceptancePolicy, DEFAULT_TRANSFER_DEBT_CEILING};
use serde_json::Value;

pub const PTR_TRANSFER_DEBT_CEILING: &str = "/acceptor/transfer_debt_ceiling";
pub const PTR_RUN_TIMEOUT_MS: &str = "/initiator/run_timeout_ms";
pub const PTR_JOURNAL_HASH_CHAIN: &str = "/journal/hash_chain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub acceptance: AcceptancePolicy,
    /// Caller-imposed deadline for each initiator run. `None` waits forever.
    pub run_timeout: Option<Duration>,
    pub journal_hash_chain: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            acceptance: AcceptancePolicy::default(),
            run_timeout: None,
            journal_hash_chain: true,
        }
    }
}

impl ProtocolConfig {
    /// Absent or `null` keys take their defaults; present keys of the wrong
    /// type or out of range are errors.
    pub fn from_config_json(v: &Value) -> Result<Self> {
        let transfer_debt_ceiling = match present(v, PTR_TRANSFER_DEBT_CEILING) {
            None => DEFAULT_TRANSFER_DEBT_CEILING,
            Some(x) => match x.as_i64() {
                Some(n) if n > 0 => n,
                _ => bail!(
                    "CONFIG_INVALID leaf={} expected positive integer, got {}",
                    PTR_TRANSFER_DEBT_CEILING,
                    x
                ),
            },
        };

        let run_timeout = match present(v, PTR_RUN_TIMEOUT_MS) {
            None => None,
            Some(x) => match x.as_u64() {
                Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                _ => bail!(
                    "CONFIG_INVALID leaf={} expected positive integer milliseconds, got {}",
                    PTR_RUN_TIMEOUT_MS,
                    x
                ),
            },
        };

        let journal_hash_chain = match present(v, PTR_JOURNAL_HASH_CHAIN) {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(x) => bail!(
                "CONFIG_INVALID leaf={} expected bool, got {}",
                PTR_JOURNAL_HASH_CHAIN,
                x
            ),
        };

        Ok(Self {
            acceptance: AcceptancePolicy {
                transfer_debt_ceiling,
            },
            run_timeout,
            journal_hash_chain,
        })
    }
}

fn present<'a>(v: &'a Value, ptr: &str) -> Option<&'a Value> {
    v.pointer(ptr).filter(|x| !x.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_gives_defaults() {
        let cfg = ProtocolConfig::from_config_json(&json!({})).unwrap();
        assert_eq!(cfg, ProtocolConfig::default());
        assert_eq!(cfg.acceptance.transfer_debt_ceiling, 100);
    }

    #[test]
    fn all_keys_read() {
        let cfg = ProtocolConfig::from_config_json(&json!({
            "acceptor": { "transfer_debt_ceiling": 500 },
            "initiator": { "run_timeout_ms": 2500 },
            "journal": { "hash_chain": false }
        }))
        .unwrap();
        assert_eq!(cfg.acceptance.transfer_debt_ceiling, 500);
        assert_eq!(cfg.run_timeout, Some(Duration::from_millis(2500)));
        assert!(!cfg.journal_hash_chain);
    }

    #[test]
    fn non_positive_ceiling_is_invalid() {
        for bad in [json!(0), json!(-5), json!("100"), json!(1.5)] {
            let err = ProtocolConfig::from_config_json(&json!({
                "acceptor": { "transfer_debt_ceiling": bad }
            }))
            .unwrap_err();
            assert!(err.to_string().contains("CONFIG_INVALID"));
        }
    }

    #[test]
    fn null_timeout_means_none() {
        let cfg = ProtocolConfig::from_config_json(&json!({
            "initiator": { "run_timeout_ms": null }
        }))
        .unwrap();
        assert_eq!(cfg.run_timeout, None);
    }
}
