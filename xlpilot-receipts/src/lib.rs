#![forbid(unsafe_code)]

//! Append-only, hash-chained log of plan executions. Each line is one JSON
//! receipt whose `chain_hash` covers its own content and the previous line's
//! hash, so any edit or deletion breaks verification from that line on.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use xlpilot_types::{FileId, SessionId};

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("io error: {0}")]
    Io(String),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("line {line}: hash chain broken")]
    ChainBroken { line: usize },
    #[error("line {line}: chain hash does not match content")]
    Tampered { line: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Committed { output_file_id: FileId },
    Aborted { index: usize, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub receipt_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub file_id: FileId,
    /// SHA-256 of the plan's JSON form.
    pub plan_hash: String,
    /// Fingerprints of the bound input tables, in binding order.
    pub input_hash: String,
    pub output_hash: Option<String>,
    pub operation_count: usize,
    pub outcome: Outcome,
    pub prev_hash: Option<String>,
    pub chain_hash: String,
}

impl ExecutionReceipt {
    pub fn new(
        session_id: SessionId,
        file_id: FileId,
        plan_hash: String,
        input_hash: String,
        operation_count: usize,
        outcome: Outcome,
    ) -> Self {
        Self {
            receipt_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id,
            file_id,
            plan_hash,
            input_hash,
            output_hash: None,
            operation_count,
            outcome,
            prev_hash: None,
            chain_hash: String::new(),
        }
    }

    pub fn with_output_hash(mut self, hash: String) -> Self {
        self.output_hash = Some(hash);
        self
    }
}

/// SHA-256 hex digest of `parts`, each separated so concatenations cannot collide.
pub fn digest<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p.as_bytes());
        h.update([0x1f]);
    }
    format!("{:x}", h.finalize())
}

fn hash_receipt(receipt: &ExecutionReceipt) -> String {
    let mut unsealed = receipt.clone();
    unsealed.chain_hash = String::new();
    let body = serde_json::to_string(&unsealed).unwrap_or_default();
    digest([body.as_str()])
}

pub struct ReceiptLog {
    path: PathBuf,
    last_hash: Mutex<Option<String>>,
}

impl ReceiptLog {
    /// Opens or creates the log, verifying what is already there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReceiptError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = if path.exists() {
            verify_log(&path)?.1
        } else {
            None
        };
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seals `receipt` onto the chain and appends it. Returns the sealed receipt.
    pub fn append(&self, mut receipt: ExecutionReceipt) -> Result<ExecutionReceipt, ReceiptError> {
        let mut last = self.last_hash.lock().map_err(|_| ReceiptError::Io("lock poisoned".into()))?;
        receipt.prev_hash = last.clone();
        receipt.chain_hash = hash_receipt(&receipt);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ReceiptError::Io(e.to_string()))?;
        let line = serde_json::to_string(&receipt).map_err(|e| ReceiptError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| ReceiptError::Io(e.to_string()))?;
        *last = Some(receipt.chain_hash.clone());
        Ok(receipt)
    }
}

fn read_lines(
    path: &Path,
) -> Result<impl Iterator<Item = (usize, Result<String, std::io::Error>)>, ReceiptError> {
    let file = File::open(path).map_err(|e| ReceiptError::Io(e.to_string()))?;
    Ok(BufReader::new(file)
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| l.as_ref().map_or(true, |s| !s.trim().is_empty())))
}

fn parse(line: usize, text: &str) -> Result<ExecutionReceipt, ReceiptError> {
    serde_json::from_str(text).map_err(|e| ReceiptError::Parse {
        line,
        message: e.to_string(),
    })
}

/// Checks the whole chain. Returns the receipt count and the last chain hash.
pub fn verify_log(path: impl AsRef<Path>) -> Result<(usize, Option<String>), ReceiptError> {
    let mut prev: Option<String> = None;
    let mut count = 0;
    for (line, text) in read_lines(path.as_ref())? {
        let text = text.map_err(|e| ReceiptError::Io(e.to_string()))?;
        let receipt = parse(line, &text)?;
        if receipt.prev_hash != prev {
            return Err(ReceiptError::ChainBroken { line });
        }
        if receipt.chain_hash != hash_receipt(&receipt) {
            return Err(ReceiptError::Tampered { line });
        }
        prev = Some(receipt.chain_hash);
        count += 1;
    }
    Ok((count, prev))
}

/// The last `n` receipts, oldest first.
pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<ExecutionReceipt>, ReceiptError> {
    let mut out = VecDeque::with_capacity(n);
    for (line, text) in read_lines(path.as_ref())? {
        let text = text.map_err(|e| ReceiptError::Io(e.to_string()))?;
        if n == 0 {
            continue;
        }
        if out.len() == n {
            out.pop_front();
        }
        out.push_back(parse(line, &text)?);
    }
    Ok(out.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_log(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("xlpilot_{name}_{}.jsonl", Uuid::new_v4()));
        let _ = fs::remove_file(&path);
        path
    }

    fn receipt(n: usize) -> ExecutionReceipt {
        ExecutionReceipt::new(
            SessionId::new(),
            FileId::new(),
            digest(["plan"]),
            digest(["input"]),
            n,
            Outcome::Committed {
                output_file_id: FileId::new(),
            },
        )
    }

    #[test]
    fn chain_verifies_and_survives_reopen() {
        let path = temp_log("chain");
        let log = ReceiptLog::open(&path).unwrap();
        let first = log.append(receipt(1)).unwrap();
        assert!(first.prev_hash.is_none());
        drop(log);

        let log = ReceiptLog::open(&path).unwrap();
        let second = log
            .append(receipt(2).with_output_hash(digest(["out"])))
            .unwrap();
        assert_eq!(second.prev_hash.as_deref(), Some(first.chain_hash.as_str()));
        assert_eq!(verify_log(&path).unwrap().0, 2);

        let last = tail(&path, 1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].operation_count, 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn edited_line_is_detected() {
        let path = temp_log("tamper");
        let log = ReceiptLog::open(&path).unwrap();
        log.append(receipt(1)).unwrap();
        log.append(receipt(3)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let forged = content.replacen("\"operation_count\":1", "\"operation_count\":9", 1);
        fs::write(&path, forged).unwrap();
        assert!(matches!(verify_log(&path), Err(ReceiptError::Tampered { line: 1 })));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn removed_line_breaks_the_chain() {
        let path = temp_log("gap");
        let log = ReceiptLog::open(&path).unwrap();
        for n in 0..3 {
            log.append(receipt(n)).unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, l)| l)
            .collect();
        fs::write(&path, kept.join("\n")).unwrap();
        assert!(matches!(verify_log(&path), Err(ReceiptError::ChainBroken { line: 2 })));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn aborted_outcome_round_trips_through_the_log() {
        let path = temp_log("abort");
        let log = ReceiptLog::open(&path).unwrap();
        let mut r = receipt(2);
        r.outcome = Outcome::Aborted {
            index: 2,
            reason: "column `x` does not exist".into(),
        };
        log.append(r).unwrap();
        let read = tail(&path, 10).unwrap();
        assert_eq!(
            read[0].outcome,
            Outcome::Aborted {
                index: 2,
                reason: "column `x` does not exist".into()
            }
        );
        let _ = fs::remove_file(&path);
    }
}
