//! sto-audit
//!
//! Append-only, hash-chained sale journal.
//!
//! - One entry per JSON line, keys sorted, compact encoding.
//! - Every entry carries `prev_hash` (the previous entry's `hash`) and its
//!   own `hash` over the canonical form with `hash` blanked.
//! - `seq` is contiguous from 0; `entry_id` is a UUIDv5 of the sale id and
//!   the chain position, so replaying the same journal yields the same ids.
//! - Reopening an existing journal verifies it and resumes the chain.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub entry_id: Uuid,
    pub sale_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    /// Event discriminator, e.g. `TOKEN_PURCHASE`.
    pub kind: String,
    pub payload: Value,
    pub prev_hash: Option<String>,
    pub hash: String,
}

/// sha256 hex over the canonical line of `entry` with `hash` blanked.
pub fn entry_hash(entry: &JournalEntry) -> Result<String> {
    let mut unhashed = entry.clone();
    unhashed.hash = String::new();
    let line = canonical_line(&unhashed)?;
    Ok(hex::encode(Sha256::digest(line.as_bytes())))
}

fn entry_id(sale_id: Uuid, seq: u64, prev_hash: Option<&str>) -> Uuid {
    let name = format!("{seq}:{}", prev_hash.unwrap_or("GENESIS"));
    Uuid::new_v5(&sale_id, name.as_bytes())
}

fn canonical_line<T: Serialize>(v: &T) -> Result<String> {
    let value = serde_json::to_value(v).context("serialize journal entry")?;
    serde_json::to_string(&sorted(value)).context("stringify journal entry")
}

fn sorted(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut pairs: Vec<(String, Value)> = map.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(pairs.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub struct JournalWriter {
    path: PathBuf,
    sale_id: Uuid,
    next_seq: u64,
    last_hash: Option<String>,
}

impl JournalWriter {
    /// Open (or create) the journal at `path` for `sale_id`.
    ///
    /// An existing file must verify cleanly and belong to the same sale;
    /// the writer then continues its chain.
    pub fn open(path: impl AsRef<Path>, sale_id: Uuid) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        let mut writer = Self {
            path,
            sale_id,
            next_seq: 0,
            last_hash: None,
        };

        if writer.path.exists() {
            let entries = read_journal(&writer.path)?;
            if let ChainCheck::Broken { line, reason } = check_entries(&entries)? {
                bail!(
                    "refusing to resume broken journal {:?} at line {line}: {reason}",
                    writer.path
                );
            }
            if let Some(last) = entries.last() {
                if last.sale_id != sale_id {
                    bail!(
                        "journal {:?} belongs to sale {}, not {}",
                        writer.path,
                        last.sale_id,
                        sale_id
                    );
                }
                writer.next_seq = last.seq + 1;
                writer.last_hash = Some(last.hash.clone());
            }
        }

        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sale_id(&self) -> Uuid {
        self.sale_id
    }

    /// Number of entries in the journal.
    pub fn len(&self) -> u64 {
        self.next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn append(&mut self, kind: &str, payload: Value) -> Result<JournalEntry> {
        self.append_at(kind, payload, Utc::now())
    }

    /// Append with an explicit timestamp.
    pub fn append_at(
        &mut self,
        kind: &str,
        payload: Value,
        recorded_at: DateTime<Utc>,
    ) -> Result<JournalEntry> {
        let mut entry = JournalEntry {
            seq: self.next_seq,
            entry_id: entry_id(self.sale_id, self.next_seq, self.last_hash.as_deref()),
            sale_id: self.sale_id,
            recorded_at,
            kind: kind.to_string(),
            payload,
            prev_hash: self.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = entry_hash(&entry)?;

        let line = canonical_line(&entry)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {:?}", self.path))?;
        f.write_all(line.as_bytes())
            .and_then(|_| f.write_all(b"\n"))
            .with_context(|| format!("append journal {:?}", self.path))?;

        // Advance only once the line is durable in the file.
        self.next_seq += 1;
        self.last_hash = Some(entry.hash.clone());
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Reading and verification
// ---------------------------------------------------------------------------

/// Outcome of walking a journal's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCheck {
    Intact { entries: usize },
    /// `line` is 1-based and counts non-blank lines.
    Broken { line: usize, reason: String },
}

pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read journal {:?}", path.as_ref()))?;
    parse_journal(&content)
}

pub fn parse_journal(content: &str) -> Result<Vec<JournalEntry>> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("parse journal entry at line {}", i + 1))
        })
        .collect()
}

pub fn verify_journal(path: impl AsRef<Path>) -> Result<ChainCheck> {
    check_entries(&read_journal(path)?)
}

pub fn verify_journal_str(content: &str) -> Result<ChainCheck> {
    check_entries(&parse_journal(content)?)
}

fn check_entries(entries: &[JournalEntry]) -> Result<ChainCheck> {
    let mut prev_hash: Option<&str> = None;
    let mut sale_id: Option<Uuid> = None;

    for (i, entry) in entries.iter().enumerate() {
        let line = i + 1;
        let broken = |reason: String| Ok(ChainCheck::Broken { line, reason });

        if entry.seq != i as u64 {
            return broken(format!("seq gap: expected {i}, got {}", entry.seq));
        }
        if *sale_id.get_or_insert(entry.sale_id) != entry.sale_id {
            return broken(format!("sale_id changed to {}", entry.sale_id));
        }
        if entry.prev_hash.as_deref() != prev_hash {
            return broken(format!(
                "prev_hash mismatch: expected {:?}, got {:?}",
                prev_hash, entry.prev_hash
            ));
        }
        let recomputed = entry_hash(entry)?;
        if recomputed != entry.hash {
            return broken(format!(
                "hash mismatch: stored {}, recomputed {recomputed}",
                entry.hash
            ));
        }
        if entry.entry_id != entry_id(entry.sale_id, entry.seq, prev_hash) {
            return broken(format!("entry_id {} not derived from chain", entry.entry_id));
        }

        prev_hash = Some(&entry.hash);
    }

    Ok(ChainCheck::Intact {
        entries: entries.len(),
    })
}
