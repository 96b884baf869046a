//! Per-search cancellation token.
//!
//! One token per search generation, shared by every producer and consumer of
//! that search. Once raised it is never lowered. The first reason recorded
//! wins, so an external abort that races a found divisor is still reported
//! consistently.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A divisor (or enough results) was found; stop searching.
    Found,
    /// The caller gave up (deadline, shutdown). Results must not be trusted as final.
    Aborted,
}

const LIVE: u8 = 0;
const FOUND: u8 = 1;
const ABORTED: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<AtomicU8>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Raise the token. Returns true if this call set the reason.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let code = match reason {
            CancelReason::Found => FOUND,
            CancelReason::Aborted => ABORTED,
        };
        self.state
            .compare_exchange(LIVE, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != LIVE
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::Acquire) {
            FOUND => Some(CancelReason::Found),
            ABORTED => Some(CancelReason::Aborted),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.reason() == Some(CancelReason::Aborted)
    }

    /// A token that is raised whenever either this token or `parent` is raised.
    /// Used to give each search generation a fresh token while still honouring
    /// a caller-held abort token.
    pub fn child_of(parent: &CancellationToken) -> LinkedToken {
        LinkedToken {
            own: CancellationToken::new(),
            parent: parent.clone(),
        }
    }
}

/// A fresh per-generation token that also observes an outer abort token.
#[derive(Debug, Clone)]
pub struct LinkedToken {
    own: CancellationToken,
    parent: CancellationToken,
}

impl LinkedToken {
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.own.cancel(reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.is_cancelled() || self.parent.is_cancelled()
    }

    /// Parent abort takes precedence: an aborted caller never sees a result.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.parent.is_aborted() {
            return Some(CancelReason::Aborted);
        }
        self.own.reason().or_else(|| self.parent.reason())
    }

    pub fn is_aborted(&self) -> bool {
        self.reason() == Some(CancelReason::Aborted)
    }
}
