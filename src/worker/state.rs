//! Per-unit lease state tracked by a worker
//!
//! ```text
//! UNCLAIMED ─▶ LEASED ─▶ HEARTBEATING* ─▶ COMPLETING ─▶ DONE
//!                 │            │               │
//!                 ├─▶ ABORTED ◀┘               └─▶ LOST
//!                 └─▶ LOST
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Where a unit is in its lease lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Unclaimed,
    Leased,
    Heartbeating,
    Completing,
    Done,
    Aborted,
    /// Reclaimed by the coordinator, or its completion was rejected
    Lost,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Leased => "leased",
            Self::Heartbeating => "heartbeating",
            Self::Completing => "completing",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Lost => "lost",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Lost)
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Unclaimed, Leased)
                | (Leased | Heartbeating, Heartbeating)
                | (Leased | Heartbeating, Completing)
                | (Leased | Heartbeating, Aborted)
                | (Leased | Heartbeating | Completing, Lost)
                | (Completing, Done)
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Unit {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: UnitState,
        to: UnitState,
    },

    #[error("Unit {0} is not tracked")]
    UnknownUnit(String),
}

/// Tally of units by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub leased: usize,
    pub heartbeating: usize,
    pub completing: usize,
    pub done: u64,
    pub aborted: u64,
    pub lost: u64,
}

/// Tracks live units; finished units only leave a count behind
#[derive(Debug, Default)]
pub struct UnitLedger {
    live: HashMap<String, UnitState>,
    done: u64,
    aborted: u64,
    lost: u64,
}

impl UnitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly assigned unit
    pub fn lease(&mut self, id: impl Into<String>) -> Result<(), StateError> {
        let id = id.into();
        match self.live.get(&id) {
            Some(&from) => Err(StateError::InvalidTransition {
                id,
                from,
                to: UnitState::Leased,
            }),
            None => {
                self.live.insert(id, UnitState::Leased);
                Ok(())
            }
        }
    }

    /// Move a unit to `next`, returning the state it left
    pub fn transition(&mut self, id: &str, next: UnitState) -> Result<UnitState, StateError> {
        let from = self
            .state(id)
            .ok_or_else(|| StateError::UnknownUnit(id.to_string()))?;

        if !from.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from,
                to: next,
            });
        }

        match next {
            UnitState::Done => self.done += 1,
            UnitState::Aborted => self.aborted += 1,
            UnitState::Lost => self.lost += 1,
            _ => {}
        }

        if next.is_terminal() {
            self.live.remove(id);
        } else {
            self.live.insert(id.to_string(), next);
        }
        Ok(from)
    }

    pub fn state(&self, id: &str) -> Option<UnitState> {
        self.live.get(id).copied()
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn counts(&self) -> LedgerCounts {
        let mut counts = LedgerCounts {
            done: self.done,
            aborted: self.aborted,
            lost: self.lost,
            ..Default::default()
        };
        for state in self.live.values() {
            match state {
                UnitState::Leased => counts.leased += 1,
                UnitState::Heartbeating => counts.heartbeating += 1,
                UnitState::Completing => counts.completing += 1,
                _ => {}
            }
        }
        counts
    }
}
