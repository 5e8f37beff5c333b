// src/core/plateau.rs — Plateau detection and escalation

use serde::{Deserialize, Serialize};

use super::types::MAX_PLATEAU_LEVEL;

/// Tracks consecutive sub-threshold rounds.
///
/// Every `rounds_before_escape` consecutive stalls raise the level by one
/// tier (capped at 3) and restart the count. Any round whose improvement
/// meets the threshold drops straight back to level 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauTracker {
    threshold: f64,
    rounds_before_escape: u32,
    level: u8,
    consecutive: u32,
}

impl PlateauTracker {
    pub fn new(threshold: f64, rounds_before_escape: u32) -> Self {
        Self {
            threshold,
            rounds_before_escape: rounds_before_escape.max(1),
            level: 0,
            consecutive: 0,
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Record a resolved round's improvement over the previous best-ever.
    pub fn record_delta(&mut self, delta: f64) {
        if delta < self.threshold {
            self.record_stall();
        } else {
            self.consecutive = 0;
            self.level = 0;
        }
    }

    /// A round without usable improvement (including a winnerless round).
    pub fn record_stall(&mut self) {
        self.consecutive += 1;
        if self.consecutive >= self.rounds_before_escape {
            self.level = (self.level + 1).min(MAX_PLATEAU_LEVEL);
            self.consecutive = 0;
        }
    }
}
