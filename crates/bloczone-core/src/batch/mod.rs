//! Batch scheduler: queues proposed updates and hands them out for flushing.
//!
//! States: Idle -> Batching -> Flushing -> Idle.
//!
//! The scheduler only does bookkeeping. Applying updates and notifying
//! observers is the container's job; it asks the scheduler what to do with
//! each proposal and pulls queued updates during a flush.

mod flush_loop;

pub(crate) use flush_loop::{FlushTarget, FlushTimer};

use std::collections::VecDeque;

use serde::Serialize;

use crate::domain::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Batching,
    Flushing,
}

/// A proposed update waiting for the next flush.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub action: String,
    /// State as it was when the update was proposed. Only captured while
    /// debug logging is on; it feeds the stale-key diagnostic of a flush.
    pub base: Option<Record>,
    pub partial: Record,
}

/// What the caller should do with a proposal.
#[derive(Debug)]
pub enum Proposal {
    /// Queued; a flush will apply it.
    Queued,
    /// Apply now. If `backlog` is set, the flush has already been claimed
    /// for the caller: drain the queue first, then apply.
    Direct { update: PendingUpdate, backlog: bool },
}

#[derive(Debug, Default)]
pub struct BatchScheduler {
    /// Nesting depth of open batch scopes.
    depth: usize,
    flushing: bool,
    pending: VecDeque<PendingUpdate>,
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> BatchPhase {
        if self.flushing {
            BatchPhase::Flushing
        } else if self.depth > 0 {
            BatchPhase::Batching
        } else {
            BatchPhase::Idle
        }
    }

    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Close one batch scope. Returns `true` when the outermost scope closed.
    pub fn exit(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub fn propose(&mut self, update: PendingUpdate) -> Proposal {
        if self.depth > 0 || self.flushing {
            self.pending.push_back(update);
            return Proposal::Queued;
        }
        // backlog の flush はここで確保する（別スレッドに割り込まれない）
        let backlog = !self.pending.is_empty();
        if backlog {
            self.flushing = true;
        }
        Proposal::Direct { update, backlog }
    }

    /// Claim the flush. Fails while another flush runs or a batch scope is open.
    pub fn try_begin_flush(&mut self) -> bool {
        if self.flushing || self.depth > 0 {
            return false;
        }
        self.flushing = true;
        true
    }

    /// Take everything queued so far, or end the flush if there is nothing
    /// left (or a batch scope was opened meanwhile).
    pub fn next_batch(&mut self) -> Option<Vec<PendingUpdate>> {
        if self.pending.is_empty() || self.depth > 0 {
            self.flushing = false;
            return None;
        }
        Some(self.pending.drain(..).collect())
    }

    /// Release a flush that stopped before `next_batch` returned `None`.
    pub fn abort_flush(&mut self) {
        self.flushing = false;
    }

    /// Queued updates, oldest first.
    pub fn pending_updates(&self) -> impl Iterator<Item = &PendingUpdate> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Merge partials in arrival order; later writes to a key win.
pub fn coalesce(updates: Vec<PendingUpdate>) -> Record {
    let mut merged = Record::new();
    for update in updates {
        merged.extend(update.partial);
    }
    merged
}
