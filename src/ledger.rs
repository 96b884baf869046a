//! # Ledger — File-Backed Factor Store
//!
//! Persists the whole factor ledger (jobs and factor rows) as a single JSON
//! document, so a job interrupted on one run resumes on the next without a
//! database. Every mutation rewrites the file before it becomes visible in
//! memory: if the write fails, the in-memory state is left untouched and the
//! caller sees the error.
//!
//! ## Atomic Writes
//!
//! The ledger is written to a temp file and renamed into place. A crash
//! mid-write leaves either the old or the new ledger, never a torn one. This
//! also makes `split_factor` atomic for this adapter.
//!
//! ## Integrity
//!
//! A SHA-256 hash is stored alongside the JSON data. On load, the hash is
//! verified — corrupted ledgers are skipped, falling back to the most recent
//! valid generation (up to 3 generations kept).
//!
//! ## Concurrency
//!
//! Threads inside one process share the store through its Mutex. Across
//! processes, the first job claim takes an OS lock on `<ledger>.lock` and keeps
//! it for the life of the store: a second process cannot drive any job of the
//! same ledger, since each process rewrites the whole file. Read-only commands
//! (`jobs`) take no lock. The OS drops the lock when the holder dies, so a
//! crashed run never leaves a stale claim behind.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rug::Integer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::store::{Factor, FactorStore, Job, JobLease, JobLocks, LedgerState};

/// Number of backup generations to keep.
const GENERATIONS: usize = 3;

#[derive(Serialize, Deserialize)]
struct StoredJob {
    id: Uuid,
    number: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StoredFactor {
    id: Uuid,
    job_id: Uuid,
    seq: i64,
    value: String,
}

#[derive(Serialize, Deserialize, Default)]
struct LedgerDocument {
    #[serde(default)]
    jobs: Vec<StoredJob>,
    #[serde(default)]
    factors: Vec<StoredFactor>,
}

/// Wrapper that includes a SHA-256 checksum for integrity verification.
#[derive(Serialize, Deserialize)]
struct LedgerEnvelope {
    checksum: String,
    data: serde_json::Value,
}

fn parse_integer(raw: &str) -> Result<Integer> {
    Integer::from_str_radix(raw, 10).map_err(|e| anyhow!("invalid integer '{}' in ledger: {}", raw, e))
}

impl LedgerDocument {
    fn from_state(state: &LedgerState) -> Self {
        LedgerDocument {
            jobs: state
                .jobs
                .iter()
                .map(|j| StoredJob {
                    id: j.id,
                    number: j.number.to_string(),
                    created_at: j.created_at,
                })
                .collect(),
            factors: state
                .factors
                .iter()
                .map(|f| StoredFactor {
                    id: f.id,
                    job_id: f.job_id,
                    seq: f.seq,
                    value: f.value.to_string(),
                })
                .collect(),
        }
    }

    fn into_state(self) -> Result<LedgerState> {
        let jobs = self
            .jobs
            .into_iter()
            .map(|j| {
                Ok(Job {
                    id: j.id,
                    number: parse_integer(&j.number)?,
                    created_at: j.created_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let factors = self
            .factors
            .into_iter()
            .map(|f| {
                Ok(Factor {
                    id: f.id,
                    job_id: f.job_id,
                    seq: f.seq,
                    value: parse_integer(&f.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(LedgerState { jobs, factors })
    }
}

/// Compute SHA-256 hex digest of a string.
fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Return the path for generation `gen` (0 = current, 1 = .1, 2 = .2, ...).
fn generation_path(base: &Path, gen: usize) -> PathBuf {
    if gen == 0 {
        base.to_path_buf()
    } else {
        let mut p = base.as_os_str().to_os_string();
        p.push(format!(".{}", gen));
        PathBuf::from(p)
    }
}

/// Write the ledger with integrity checksum and rotating generations.
///
/// Rotation: current → .1 → .2 (oldest .2 is discarded).
/// The new ledger is written atomically via a .tmp file.
fn save(path: &Path, state: &LedgerState) -> Result<()> {
    let data = serde_json::to_value(LedgerDocument::from_state(state))?;
    let data_str = serde_json::to_string_pretty(&data)?;
    let checksum = sha256_hex(&data_str);
    let envelope = LedgerEnvelope { checksum, data };
    let json = serde_json::to_string_pretty(&envelope)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json).with_context(|| format!("writing {}", tmp.display()))?;

    for gen in (1..GENERATIONS).rev() {
        let src = generation_path(path, gen - 1);
        let dst = generation_path(path, gen);
        if src.exists() {
            let _ = fs::copy(&src, &dst);
        }
    }

    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Sibling file carrying the cross-process lock.
fn lock_path(base: &Path) -> PathBuf {
    let mut p = base.as_os_str().to_os_string();
    p.push(".lock");
    PathBuf::from(p)
}

/// Try to load and verify a single ledger file.
fn load_single(path: &Path) -> Option<LedgerState> {
    let raw = fs::read_to_string(path).ok()?;
    let envelope: LedgerEnvelope = serde_json::from_str(&raw).ok()?;

    let data_str = serde_json::to_string_pretty(&envelope.data).ok()?;
    let expected = sha256_hex(&data_str);
    if expected != envelope.checksum {
        warn!(
            path = %path.display(),
            expected = &expected[..12],
            got = &envelope.checksum[..12.min(envelope.checksum.len())],
            "ledger integrity check failed"
        );
        return None;
    }

    let doc: LedgerDocument = serde_json::from_value(envelope.data).ok()?;
    doc.into_state().ok()
}

/// Load the newest valid ledger, falling back to older generations on corruption.
///
/// Returns an empty ledger when no generation exists yet, and an error when
/// files exist but none of them verifies (the caller must not silently start over).
fn load(path: &Path) -> Result<LedgerState> {
    let mut any_present = false;
    for gen in 0..GENERATIONS {
        let p = generation_path(path, gen);
        if !p.exists() {
            continue;
        }
        any_present = true;
        if let Some(state) = load_single(&p) {
            if gen > 0 {
                warn!(generation = gen, path = %p.display(), "recovered ledger from backup generation");
            }
            return Ok(state);
        }
    }
    if any_present {
        return Err(anyhow!(
            "no valid ledger generation found at {}",
            path.display()
        ));
    }
    Ok(LedgerState::default())
}

pub struct LedgerStore {
    path: PathBuf,
    state: Mutex<LedgerState>,
    locks: JobLocks,
    file_lock: Mutex<Option<File>>,
}

impl LedgerStore {
    /// Open (or create on first write) the ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = load(&path)?;
        Ok(LedgerStore {
            path,
            state: Mutex::new(state),
            locks: JobLocks::default(),
            file_lock: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("ledger lock poisoned"))?;
        Ok(f(&state))
    }

    /// Apply `f` to a copy of the ledger, persist it, then publish it.
    fn mutate<T>(&self, f: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("ledger lock poisoned"))?;
        let mut next = state.clone();
        let out = f(&mut next)?;
        save(&self.path, &next)?;
        *state = next;
        Ok(out)
    }

    /// Take the OS lock on the ledger once and hold it until the store drops.
    /// Returns false when another process holds it.
    fn hold_file_lock(&self) -> Result<bool> {
        let mut held = self
            .file_lock
            .lock()
            .map_err(|_| anyhow!("ledger lock poisoned"))?;
        if held.is_some() {
            return Ok(true);
        }
        let path = lock_path(&self.path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        match file.try_lock() {
            Ok(()) => {
                *held = Some(file);
                Ok(true)
            }
            Err(TryLockError::WouldBlock) => {
                warn!(path = %path.display(), "Ledger is locked by another process");
                Ok(false)
            }
            Err(TryLockError::Error(e)) => {
                Err(anyhow::Error::new(e).context(format!("locking {}", path.display())))
            }
        }
    }
}

impl FactorStore for LedgerStore {
    fn create_job(&self, number: &Integer) -> Result<Job> {
        self.mutate(|s| Ok(s.create_job(number)))
    }

    fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.read(|s| s.job(job_id).cloned())
    }

    fn find_job_by_number(&self, number: &Integer) -> Result<Option<Job>> {
        self.read(|s| s.jobs.iter().find(|j| &j.number == number).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        self.read(|s| s.jobs.clone())
    }

    fn delete_job(&self, job_id: Uuid) -> Result<()> {
        self.mutate(|s| {
            s.delete_job(job_id);
            Ok(())
        })
    }

    fn append_factor(&self, job_id: Uuid, value: &Integer) -> Result<Factor> {
        self.mutate(|s| s.append_factor(job_id, value))
    }

    fn get_factor_after(&self, job_id: Uuid, after_seq: i64) -> Result<Option<Factor>> {
        self.read(|s| s.factor_after(job_id, after_seq).cloned())
    }

    fn get_most_recent_factor(&self, job_id: Uuid) -> Result<Option<Factor>> {
        self.read(|s| s.most_recent(job_id).cloned())
    }

    fn delete_factor(&self, factor_id: Uuid) -> Result<()> {
        self.mutate(|s| {
            s.delete_factor(factor_id);
            Ok(())
        })
    }

    fn delete_all_factors(&self, job_id: Uuid) -> Result<()> {
        self.mutate(|s| {
            s.delete_all_factors(job_id);
            Ok(())
        })
    }

    fn split_factor(
        &self,
        job_id: Uuid,
        replaced: Option<&Factor>,
        divisor: &Integer,
        quotient: &Integer,
    ) -> Result<(Factor, Factor)> {
        self.mutate(|s| s.split_factor(job_id, replaced, divisor, quotient))
    }

    fn try_lock_job(&self, job_id: Uuid) -> Result<Option<JobLease>> {
        if !self.hold_file_lock()? {
            return Ok(None);
        }
        self.locks.try_claim(job_id)
    }
}
