use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::signature::DocumentSigner;

const MAX_ROTATIONS: usize = 5;
const CHAIN_START: &str = "CHAIN_START";

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub prev_hash: String,
    pub hash: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub line: usize,
    pub seq: Option<u64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub entries: usize,
    pub last_seq: Option<u64>,
    pub broken: Option<ChainBreak>,
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        self.broken.is_none()
    }
}

/// Append-only, hash-chained and signed JSON-lines audit log.
pub struct EventLog {
    path: PathBuf,
    signer: DocumentSigner,
    inner: Mutex<LogState>,
    max_bytes: u64,
}

#[derive(Debug)]
struct LogState {
    last_seq: u64,
    last_hash: String,
}

impl EventLog {
    pub fn new<P: AsRef<Path>>(path: P, signer: DocumentSigner, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create audit log dir {}", parent.display()))?;
        }
        let (last_seq, last_hash) = Self::load_state(&path)?;
        debug!(path = %path.display(), last_seq, "audit log opened");
        Ok(Self {
            path,
            signer,
            inner: Mutex::new(LogState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    /// Last good sequence number and hash. Reading stops at the first entry
    /// that does not parse, such as a line torn by a crash mid-append; the
    /// break stays in the file for `verify_chain` to report.
    fn load_state(path: &Path) -> Result<(u64, String)> {
        if !path.exists() {
            return Ok((0, CHAIN_START.to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let mut last_seq = 0;
        let mut last_hash = CHAIN_START.to_string();
        for (idx, line) in reader.lines().enumerate() {
            let parsed = match line {
                Ok(l) if l.trim().is_empty() => continue,
                Ok(l) => serde_json::from_str::<LogEntry>(&l).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(entry) => {
                    last_seq = entry.seq;
                    last_hash = entry.hash;
                }
                Err(reason) => {
                    warn!(
                        path = %path.display(),
                        line = idx + 1,
                        last_seq,
                        reason = %reason,
                        "unreadable audit log entry, continuing from last good entry"
                    );
                    break;
                }
            }
        }
        Self::terminate_last_line(path)?;
        Ok((last_seq, last_hash))
    }

    // A torn final line must not swallow the next entry.
    fn terminate_last_line(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(());
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    fn compute_hash(unhashed: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(unhashed.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn append(&self, event: &AuditEvent) -> Result<LogEntry> {
        let mut state = self.inner.lock();
        self.rotate_if_needed(&mut state)?;
        let seq = state.last_seq + 1;
        let mut entry_value = serde_json::json!({
            "seq": seq,
            "timestamp": Utc::now(),
            "event": serde_json::to_value(event)?,
            "prev_hash": state.last_hash,
        });
        let hash = Self::compute_hash(&entry_value);
        entry_value["hash"] = Value::String(hash.clone());
        let signature = self.signer.sign(entry_value.to_string().as_bytes());
        entry_value["signature"] = Value::String(signature);

        // The line is written from the same value that was hashed and signed.
        let line = entry_value.to_string();
        let entry: LogEntry = serde_json::from_value(entry_value)?;
        self.write_line(&line)?;
        state.last_seq = seq;
        state.last_hash = hash;
        Ok(entry)
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self, state: &mut LogState) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1))?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1))?;
        // new file, new chain; seq stays monotonic
        state.last_hash = CHAIN_START.to_string();
        debug!(path = %self.path.display(), "audit log rotated");
        Ok(())
    }

    /// Read recent entries, newest first, optionally filtered by `since`.
    /// Lines that do not parse are skipped.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<LogEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<LogEntry>(&line) else {
                debug!("skipping unreadable audit log line");
                continue;
            };
            if let Some(since_ts) = &since {
                if entry.timestamp < *since_ts {
                    continue;
                }
            }
            entries.push(entry);
        }
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    /// Re-check hashes, links, sequence and signatures of the current file.
    pub fn verify_chain(&self) -> Result<ChainVerification> {
        let _writer = self.inner.lock();
        let mut result = ChainVerification {
            entries: 0,
            last_seq: None,
            broken: None,
        };
        if !self.path.exists() {
            return Ok(result);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut prev_hash = CHAIN_START.to_string();
        for (idx, line) in reader.lines().enumerate() {
            let value = match line {
                Ok(l) if l.trim().is_empty() => continue,
                Ok(l) => serde_json::from_str::<Value>(&l)
                    .map_err(|e| format!("unparseable entry: {e}")),
                Err(e) => Err(format!("unreadable entry: {e}")),
            };
            let line_no = idx + 1;
            let seq = value.as_ref().ok().and_then(|v| v["seq"].as_u64());
            let check = value.and_then(|v| self.check_entry(v, &prev_hash, result.last_seq));
            match check {
                Ok((seq, hash)) => {
                    result.entries += 1;
                    result.last_seq = Some(seq);
                    prev_hash = hash;
                }
                Err(reason) => {
                    warn!(line = line_no, reason = %reason, "audit log chain broken");
                    result.broken = Some(ChainBreak {
                        line: line_no,
                        seq,
                        reason,
                    });
                    break;
                }
            }
        }
        Ok(result)
    }

    fn check_entry(
        &self,
        value: Value,
        prev_hash: &str,
        last_seq: Option<u64>,
    ) -> std::result::Result<(u64, String), String> {
        let Value::Object(mut fields) = value else {
            return Err("entry is not an object".into());
        };
        let signature = take_str(&mut fields, "signature").ok_or("missing signature")?;
        let signed = Value::Object(fields.clone()).to_string();
        match self.signer.verify(signed.as_bytes(), &signature) {
            Ok(true) => {}
            Ok(false) => return Err("signature does not verify".into()),
            Err(e) => return Err(e.to_string()),
        }
        let hash = take_str(&mut fields, "hash").ok_or("missing hash")?;
        if Self::compute_hash(&Value::Object(fields.clone())) != hash {
            return Err("entry hash mismatch".into());
        }
        if fields.get("prev_hash").and_then(Value::as_str) != Some(prev_hash) {
            return Err("previous hash link broken".into());
        }
        let seq = fields
            .get("seq")
            .and_then(Value::as_u64)
            .ok_or("missing sequence number")?;
        if let Some(last) = last_seq {
            if seq != last + 1 {
                return Err(format!("sequence gap after {last}"));
            }
        }
        Ok((seq, hash))
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audit.log".to_string());
        self.path.with_file_name(format!("{}.{}", filename, index))
    }
}

fn take_str(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

impl AuditSink for EventLog {
    fn record(&self, event: AuditEvent) -> Result<()> {
        self.append(&event).map(|_| ())
    }
}
