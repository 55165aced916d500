//! Network snapshots: the canonical view of intersection state.
//!
//! A snapshot is immutable once built. The arbitration core owns the single
//! canonical copy; everything published to subscribers is a value copy.
//! Snapshots arriving from the field adapter pass structural validation
//! before they are allowed anywhere near canonical state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{IntersectionId, PhaseId};

pub const MAX_SNAPSHOT_INTERSECTIONS: usize = 4_096;
pub const MAX_APPROACHES_PER_INTERSECTION: usize = 16;
pub const MAX_APPROACH_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Snapshot value types
// ---------------------------------------------------------------------------

/// Observed state of one intersection at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionState {
    /// Phases currently displayed green.
    pub active_greens: BTreeSet<PhaseId>,
    /// Queued vehicle count per approach name.
    pub queue_lengths: BTreeMap<String, u32>,
    /// Field-adapter timestamp of the last detector update, in ms.
    pub last_update_ms: u64,
}

impl IntersectionState {
    pub fn new(last_update_ms: u64) -> Self {
        Self {
            active_greens: BTreeSet::new(),
            queue_lengths: BTreeMap::new(),
            last_update_ms,
        }
    }

    /// Total queued vehicles across all approaches, saturating.
    pub fn total_queue(&self) -> u64 {
        self.queue_lengths
            .values()
            .fold(0u64, |acc, q| acc.saturating_add(u64::from(*q)))
    }

    /// The approach with the longest queue, ties broken by name order.
    pub fn longest_queue(&self) -> Option<(&str, u32)> {
        self.queue_lengths
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(name, q)| (name.as_str(), *q))
    }
}

/// A complete, timestamped view of all intersection states at one tick.
///
/// `tick_ms` is the field adapter's monotonic snapshot timestamp; a snapshot
/// whose `tick_ms` does not advance past the canonical one is stale input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub tick_ms: u64,
    pub intersections: BTreeMap<IntersectionId, IntersectionState>,
}

impl NetworkSnapshot {
    pub fn new(tick_ms: u64) -> Self {
        Self {
            tick_ms,
            intersections: BTreeMap::new(),
        }
    }

    pub fn with_intersection(
        mut self,
        id: IntersectionId,
        state: IntersectionState,
    ) -> Self {
        self.intersections.insert(id, state);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.intersections.is_empty()
    }

    /// Structural validation for snapshots arriving from outside.
    pub fn validate(&self) -> Result<(), SnapshotValidationError> {
        if self.intersections.is_empty() {
            return Err(SnapshotValidationError::NoIntersections);
        }
        if self.intersections.len() > MAX_SNAPSHOT_INTERSECTIONS {
            return Err(SnapshotValidationError::TooManyIntersections {
                actual: self.intersections.len(),
            });
        }
        for (id, state) in &self.intersections {
            if id.is_empty() {
                return Err(SnapshotValidationError::EmptyIntersectionId);
            }
            if state.queue_lengths.len() > MAX_APPROACHES_PER_INTERSECTION {
                return Err(SnapshotValidationError::TooManyApproaches {
                    intersection_id: id.clone(),
                    actual: state.queue_lengths.len(),
                });
            }
            for approach in state.queue_lengths.keys() {
                if approach.is_empty() || approach.len() > MAX_APPROACH_NAME_LEN {
                    return Err(SnapshotValidationError::InvalidApproachName {
                        intersection_id: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Structural validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValidationError {
    /// An empty snapshot is a sensor failure, not an empty network.
    NoIntersections,
    TooManyIntersections {
        actual: usize,
    },
    EmptyIntersectionId,
    TooManyApproaches {
        intersection_id: IntersectionId,
        actual: usize,
    },
    /// Approach name empty or longer than [`MAX_APPROACH_NAME_LEN`].
    InvalidApproachName {
        intersection_id: IntersectionId,
    },
}

impl SnapshotValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoIntersections => "GW-SNAP-0001",
            Self::TooManyIntersections { .. } => "GW-SNAP-0002",
            Self::EmptyIntersectionId => "GW-SNAP-0003",
            Self::TooManyApproaches { .. } => "GW-SNAP-0004",
            Self::InvalidApproachName { .. } => "GW-SNAP-0005",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NoIntersections => "snapshot carries no intersections".to_string(),
            Self::TooManyIntersections { actual } => format!(
                "snapshot carries {actual} intersections, maximum is {MAX_SNAPSHOT_INTERSECTIONS}"
            ),
            Self::EmptyIntersectionId => "snapshot carries an empty intersection id".to_string(),
            Self::TooManyApproaches {
                intersection_id,
                actual,
            } => format!(
                "intersection {intersection_id} reports {actual} approaches, maximum is {MAX_APPROACHES_PER_INTERSECTION}"
            ),
            Self::InvalidApproachName { intersection_id } => {
                format!("intersection {intersection_id} reports an invalid approach name")
            }
        }
    }
}

impl fmt::Display for SnapshotValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.error_code())
    }
}

impl std::error::Error for SnapshotValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_queues(queues: &[(&str, u32)]) -> IntersectionState {
        let mut state = IntersectionState::new(1_000);
        for (name, q) in queues {
            state.queue_lengths.insert((*name).to_string(), *q);
        }
        state
    }

    #[test]
    fn totals_and_longest_queue() {
        let state = state_with_queues(&[("north", 12), ("south", 7), ("east", 12)]);
        assert_eq!(state.total_queue(), 31);
        // Ties resolve to the lexicographically smaller approach.
        assert_eq!(state.longest_queue(), Some(("east", 12)));
        assert_eq!(IntersectionState::new(0).longest_queue(), None);
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        let err = NetworkSnapshot::new(5_000).validate().unwrap_err();
        assert_eq!(err, SnapshotValidationError::NoIntersections);
        assert_eq!(err.error_code(), "GW-SNAP-0001");
    }

    #[test]
    fn valid_snapshot_passes() {
        let snapshot = NetworkSnapshot::new(5_000).with_intersection(
            IntersectionId::from("x-main"),
            state_with_queues(&[("north", 3)]),
        );
        assert_eq!(snapshot.validate(), Ok(()));
    }

    #[test]
    fn empty_intersection_id_is_rejected() {
        let snapshot = NetworkSnapshot::new(5_000)
            .with_intersection(IntersectionId::from(""), IntersectionState::new(0));
        assert_eq!(
            snapshot.validate().unwrap_err(),
            SnapshotValidationError::EmptyIntersectionId
        );
    }

    #[test]
    fn oversized_approach_name_is_rejected() {
        let long_name = "n".repeat(MAX_APPROACH_NAME_LEN + 1);
        let mut state = IntersectionState::new(0);
        state.queue_lengths.insert(long_name, 1);
        let snapshot = NetworkSnapshot::new(5_000)
            .with_intersection(IntersectionId::from("x-main"), state);
        assert!(matches!(
            snapshot.validate().unwrap_err(),
            SnapshotValidationError::InvalidApproachName { .. }
        ));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = NetworkSnapshot::new(7_500).with_intersection(
            IntersectionId::from("x-main"),
            state_with_queues(&[("north", 4), ("west", 9)]),
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: NetworkSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
