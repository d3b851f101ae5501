//! Backward pagination state machine.
//!
//! The coordinator decides *whether* a history fetch may start; it does not
//! fetch. One coordinator covers one conversation and is reset on switch.
//!
//! ```text
//!  begin_initial        finish_initial(true)
//! ──────────────► LoadingInitial ──────────────► Idle ◄──────────┐
//!                      │  finish_initial(false)   │ try_begin_older
//!                      ▼                          ▼             │ finish_older(true)
//!                  Exhausted ◄──────────────── LoadingOlder ─────┘ / fail_older
//!                             finish_older(false)
//! ```

use serde::Serialize;

/// Where the coordinator is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationState {
    /// Nothing in flight; older history may exist.
    Idle,
    /// The first page is being fetched.
    LoadingInitial,
    /// An older page is being fetched.
    LoadingOlder,
    /// The start of history has been reached. Terminal until reset.
    Exhausted,
}

/// Gatekeeper for history fetches of one conversation.
#[derive(Debug, Clone)]
pub struct PaginationCoordinator {
    state: PaginationState,
}

impl PaginationCoordinator {
    /// A coordinator with nothing loaded yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: PaginationState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PaginationState {
        self.state
    }

    /// The first page is being requested.
    pub fn begin_initial(&mut self) {
        self.state = PaginationState::LoadingInitial;
    }

    /// The first page arrived.
    pub fn finish_initial(&mut self, has_more: bool) {
        if self.state == PaginationState::LoadingInitial {
            self.state = if has_more {
                PaginationState::Idle
            } else {
                PaginationState::Exhausted
            };
        }
    }

    /// The first page failed; a later load may retry.
    pub fn fail_initial(&mut self) {
        if self.state == PaginationState::LoadingInitial {
            self.state = PaginationState::Idle;
        }
    }

    /// Start an older-page load if every precondition holds.
    ///
    /// Returns `false` while any load is in flight, after exhaustion, for
    /// an empty list, or when the viewport is not at the oldest item. A
    /// refused trigger is dropped, not queued.
    pub fn try_begin_older(&mut self, list_non_empty: bool, at_oldest_visible: bool) -> bool {
        if self.state != PaginationState::Idle || !list_non_empty || !at_oldest_visible {
            return false;
        }
        self.state = PaginationState::LoadingOlder;
        true
    }

    /// An older page arrived. Returns `true` if history is now exhausted.
    pub fn finish_older(&mut self, has_more: bool) -> bool {
        if self.state != PaginationState::LoadingOlder {
            return false;
        }
        if has_more {
            self.state = PaginationState::Idle;
            false
        } else {
            self.state = PaginationState::Exhausted;
            true
        }
    }

    /// An older page failed; the next trigger retries.
    pub fn fail_older(&mut self) {
        if self.state == PaginationState::LoadingOlder {
            self.state = PaginationState::Idle;
        }
    }

    /// Whether older history may still exist.
    #[must_use]
    pub fn has_more_older(&self) -> bool {
        self.state != PaginationState::Exhausted
    }

    /// Whether a fetch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(
            self.state,
            PaginationState::LoadingInitial | PaginationState::LoadingOlder
        )
    }

    /// Forget everything; used when switching conversations.
    pub fn reset(&mut self) {
        self.state = PaginationState::Idle;
    }
}

impl Default for PaginationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
