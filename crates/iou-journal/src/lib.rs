//! iou-journal
//!
//! Append-only JSONL journal of committed transitions, one canonical
//! (sorted-key) line per transition. With the hash chain enabled each entry
//! carries `hash_prev` and `hash_self`, so any edit, reorder or deletion
//! breaks verification from that line on.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use iou_contract::CommittedTransition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic entry ids.
const ENTRY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b0a_8e51_0c2d_7b9f_a341);

const GENESIS: &str = "GENESIS";

/// Append-only journal writer for one ledger view.
pub struct JournalWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of entries written so far; the next entry's `seq`.
    seq: u64,
}

impl JournalWriter {
    /// Start a new journal at `path`, creating parent directories.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Continue an existing journal. The file is verified first; a broken
    /// journal is refused. A missing file starts a fresh journal.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut writer = Self::new(path, hash_chain)?;
        if !writer.path.exists() {
            return Ok(writer);
        }
        let entries = read_entries(&writer.path)?;
        if let JournalVerdict::Broken { line, reason } = verify_entries(&entries) {
            bail!(
                "JOURNAL_BROKEN path={:?} line={} reason={}",
                writer.path,
                line,
                reason
            );
        }
        writer.seq = entries.len() as u64;
        writer.last_hash = entries.last().and_then(|e| e.hash_self.clone());
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one committed transition as seen by `owner`.
    pub fn append(&mut self, owner: &str, tx: &CommittedTransition) -> Result<JournalEntry> {
        let proposal_id = tx.proposal_id.to_string();
        let entry_id = derive_entry_id(self.last_hash.as_deref(), self.seq, &proposal_id);
        let transition = serde_json::to_value(tx).context("serialize committed transition")?;

        let mut entry = JournalEntry {
            entry_id,
            seq: self.seq,
            owner: owner.to_string(),
            recorded_at: Utc::now(),
            proposal_id,
            linear_id: tx.linear_id().0,
            command: tx.command.as_str().to_string(),
            transition,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            entry.hash_prev = self.last_hash.clone();
            entry.hash_self = Some(compute_entry_hash(&entry)?);
        }

        let line = canonical_json_line(&entry)?;
        append_line(&self.path, &line)?;

        self.seq += 1;
        if self.hash_chain {
            self.last_hash = entry.hash_self.clone();
        }
        Ok(entry)
    }
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub seq: u64,
    /// Name of the party whose view recorded this transition.
    pub owner: String,
    pub recorded_at: DateTime<Utc>,
    pub proposal_id: String,
    pub linear_id: Uuid,
    pub command: String,
    pub transition: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

impl JournalEntry {
    pub fn transition(&self) -> Result<CommittedTransition> {
        serde_json::from_value(self.transition.clone())
            .with_context(|| format!("decode transition in journal entry seq={}", self.seq))
    }
}

/// Deterministic id from chain position; no RNG.
fn derive_entry_id(last_hash: Option<&str>, seq: u64, proposal_id: &str) -> Uuid {
    let name = format!("{}|{}|{}", last_hash.unwrap_or(GENESIS), seq, proposal_id);
    Uuid::new_v5(&ENTRY_NAMESPACE, name.as_bytes())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open journal {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write journal line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize journal entry failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 of the canonical entry with `hash_self` cleared.
pub fn compute_entry_hash(entry: &JournalEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

// ---------------------------------------------------------------------------
// Reading and verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalVerdict {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read journal {:?}", path.as_ref()))?;
    parse_entries(&content)
}

fn parse_entries(content: &str) -> Result<Vec<JournalEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l.trim())
                .with_context(|| format!("parse journal entry at line {}", i + 1))
        })
        .collect()
}

pub fn verify_journal(path: impl AsRef<Path>) -> Result<JournalVerdict> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read journal {:?}", path.as_ref()))?;
    verify_journal_str(&content)
}

/// Same checks as [`verify_journal`] on in-memory JSONL content.
pub fn verify_journal_str(content: &str) -> Result<JournalVerdict> {
    Ok(verify_entries(&parse_entries(content)?))
}

fn verify_entries(entries: &[JournalEntry]) -> JournalVerdict {
    let mut prev_hash: Option<String> = None;

    for (i, entry) in entries.iter().enumerate() {
        let line = i + 1;
        let broken = |reason: String| JournalVerdict::Broken { line, reason };

        if entry.seq != i as u64 {
            return broken(format!("seq mismatch: expected {}, got {}", i, entry.seq));
        }
        if entry.hash_prev != prev_hash {
            return broken(format!(
                "hash_prev mismatch: expected {:?}, got {:?}",
                prev_hash, entry.hash_prev
            ));
        }
        if let Some(claimed) = &entry.hash_self {
            match compute_entry_hash(entry) {
                Ok(recomputed) if &recomputed == claimed => {}
                Ok(recomputed) => {
                    return broken(format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed, recomputed
                    ))
                }
                Err(e) => return broken(format!("hash_self not computable: {e}")),
            }
        }
        let expected_id = derive_entry_id(prev_hash.as_deref(), entry.seq, &entry.proposal_id);
        if entry.entry_id != expected_id {
            return broken(format!("entry_id mismatch: got {}", entry.entry_id));
        }

        prev_hash = entry.hash_self.clone();
    }

    JournalVerdict::Valid {
        lines: entries.len(),
    }
}
