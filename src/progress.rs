//! # Progress — Search Snapshot and Background Status Reporter
//!
//! Thread-safe progress tracking shared between the divisor-search feeders and
//! the background status reporter. Counters are atomics updated lock-free by
//! workers; the cursor position sits behind a Mutex and is assigned in place
//! (no reallocation) by whichever feeder dispatched the latest candidate.
//!
//! The reporter only reads. It never influences which candidates are tested or
//! in which order, so a job produces the same factors with or without it.
//!
//! ## Background Reporter
//!
//! A dedicated thread prints a status line to stdout on a fixed interval:
//! elapsed time, cursor, bit length of the value under search, factors found,
//! and throughput since the previous snapshot. It polls the `shutdown` flag
//! between ticks so `stop()` takes effect promptly.

use crossbeam_channel::tick;
use rug::{Assign, Integer};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub struct Progress {
    /// Candidates tested across all searches of the job.
    pub tested: AtomicU64,
    /// Factors persisted so far.
    pub found: AtomicU64,
    /// Bit length of the cofactor currently being searched.
    pub bits: AtomicU32,
    cursor: Mutex<Integer>,
    last: Mutex<(u64, Instant)>,
    start: Instant,
    shutdown: AtomicBool,
}

/// One observation of a running job, as printed by the reporter.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub elapsed: Duration,
    pub cursor: Integer,
    pub bits: u32,
    pub tested: u64,
    pub found: u64,
    /// Candidates per second since the previous snapshot.
    pub rate: f64,
}

impl StatusSnapshot {
    pub fn line(&self) -> String {
        let secs = self.elapsed.as_secs();
        format!(
            "[{:02}:{:02}:{:02}] cursor: {} | searching {}-bit value | factors found: {} | tested: {} | {:.2} candidates/s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60,
            self.cursor,
            self.bits,
            self.found,
            self.tested,
            self.rate
        )
    }
}

impl Progress {
    pub fn new() -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Progress {
            tested: AtomicU64::new(0),
            found: AtomicU64::new(0),
            bits: AtomicU32::new(0),
            cursor: Mutex::new(Integer::new()),
            last: Mutex::new((0, now)),
            start: now,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn set_cursor(&self, value: &Integer) {
        if let Ok(mut cursor) = self.cursor.lock() {
            cursor.assign(value);
        }
    }

    pub fn set_target(&self, value: &Integer) {
        self.bits.store(value.significant_bits(), Ordering::Relaxed);
    }

    /// Take a snapshot and reset the throughput window.
    pub fn snapshot(&self) -> StatusSnapshot {
        let now = Instant::now();
        let tested = self.tested.load(Ordering::Relaxed);
        let cursor = self
            .cursor
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        let rate = match self.last.lock() {
            Ok(mut last) => {
                let (prev_tested, prev_at) = *last;
                *last = (tested, now);
                let window = now.duration_since(prev_at).as_secs_f64();
                if window > 0.0 {
                    tested.saturating_sub(prev_tested) as f64 / window
                } else {
                    0.0
                }
            }
            Err(_) => 0.0,
        };
        StatusSnapshot {
            elapsed: self.start.elapsed(),
            cursor,
            bits: self.bits.load(Ordering::Relaxed),
            tested,
            found: self.found.load(Ordering::Relaxed),
            rate,
        }
    }

    pub fn start_reporter(self: &Arc<Self>, interval: Duration) -> thread::JoinHandle<()> {
        let progress = Arc::clone(self);
        thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                if progress.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if ticker.recv_timeout(SHUTDOWN_POLL).is_ok() {
                    progress.print_status();
                }
            }
        })
    }

    pub fn print_status(&self) -> StatusSnapshot {
        let snap = self.snapshot();
        println!("{}", snap.line());
        info!(
            cursor = %snap.cursor,
            bits = snap.bits,
            tested = snap.tested,
            found = snap.found,
            rate = format_args!("{:.2}", snap.rate),
            "search progress"
        );
        snap
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
