//! Command proposals and the stale-proposal gate.
//!
//! A proposal is one candidate timing plan for one intersection, tagged with
//! the issuing source, a confidence score, and a per-source monotonic
//! sequence number. The sequence gate enforces the stale-proposal invariant:
//! once a sequence number has been accepted for a source, nothing at or
//! below it is ever considered again.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{IntersectionId, SourceId};
use crate::plan::{PlanValidationError, TimingPlan};

/// Fixed-point unit: 1_000_000 millionths represent 1.0.
pub const MILLION: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// CommandProposal
// ---------------------------------------------------------------------------

/// A candidate signal-timing command for one intersection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProposal {
    pub intersection_id: IntersectionId,
    pub source_id: SourceId,
    pub plan: TimingPlan,
    /// Source-reported confidence in millionths, `0..=1_000_000`.
    pub confidence_millionths: i64,
    /// Source-side issue timestamp, in ms.
    pub issued_at_ms: u64,
    /// Monotonic per-source sequence number.
    pub seq: u64,
}

impl CommandProposal {
    /// Structural validation for proposals arriving from outside.
    pub fn validate(&self) -> Result<(), ProposalValidationError> {
        if self.intersection_id.is_empty() {
            return Err(ProposalValidationError::EmptyIntersectionId);
        }
        if self.source_id.is_empty() {
            return Err(ProposalValidationError::EmptySourceId);
        }
        self.plan.validate().map_err(ProposalValidationError::Plan)?;
        if self.confidence_millionths < 0 || self.confidence_millionths > MILLION {
            return Err(ProposalValidationError::ConfidenceOutOfRange {
                millionths: self.confidence_millionths,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Structural validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalValidationError {
    EmptyIntersectionId,
    EmptySourceId,
    Plan(PlanValidationError),
    ConfidenceOutOfRange { millionths: i64 },
}

impl ProposalValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyIntersectionId => "GW-PROP-0001",
            Self::EmptySourceId => "GW-PROP-0002",
            Self::Plan(err) => err.error_code(),
            Self::ConfidenceOutOfRange { .. } => "GW-PROP-0003",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::EmptyIntersectionId => "proposal carries an empty intersection id".to_string(),
            Self::EmptySourceId => "proposal carries an empty source id".to_string(),
            Self::Plan(err) => err.message(),
            Self::ConfidenceOutOfRange { millionths } => {
                format!("confidence {millionths} outside 0..={MILLION} millionths")
            }
        }
    }
}

impl fmt::Display for ProposalValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.error_code())
    }
}

impl std::error::Error for ProposalValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Plan(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SequenceGate: the stale-proposal invariant
// ---------------------------------------------------------------------------

/// Tracks the highest accepted sequence number per source.
///
/// `accept` is the only mutating entry point; a sequence number at or below
/// the last accepted one for the same source is stale and refused, so
/// replays and out-of-order deliveries can never influence arbitration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGate {
    last_accepted: BTreeMap<SourceId, u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fresh(&self, source_id: &SourceId, seq: u64) -> bool {
        match self.last_accepted.get(source_id) {
            Some(last) => seq > *last,
            None => true,
        }
    }

    /// Accepts `seq` for `source_id` if fresh, recording it as the new high
    /// water mark. Returns whether the sequence number was accepted.
    pub fn accept(&mut self, source_id: &SourceId, seq: u64) -> bool {
        if !self.is_fresh(source_id, seq) {
            return false;
        }
        self.last_accepted.insert(source_id.clone(), seq);
        true
    }

    pub fn last_accepted(&self, source_id: &SourceId) -> Option<u64> {
        self.last_accepted.get(source_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PhaseId;

    fn proposal(seq: u64) -> CommandProposal {
        CommandProposal {
            intersection_id: IntersectionId::from("x-main"),
            source_id: SourceId::from("ai-core"),
            plan: TimingPlan::of_phases([(PhaseId(1), 20_000), (PhaseId(2), 20_000)]),
            confidence_millionths: 950_000,
            issued_at_ms: 1_000,
            seq,
        }
    }

    #[test]
    fn valid_proposal_passes() {
        assert_eq!(proposal(1).validate(), Ok(()));
    }

    #[test]
    fn confidence_bounds_are_enforced() {
        let mut p = proposal(1);
        p.confidence_millionths = MILLION + 1;
        assert_eq!(
            p.validate().unwrap_err(),
            ProposalValidationError::ConfidenceOutOfRange {
                millionths: MILLION + 1
            }
        );
        p.confidence_millionths = -1;
        assert!(p.validate().is_err());
    }

    #[test]
    fn plan_errors_surface_with_plan_codes() {
        let mut p = proposal(1);
        p.plan.steps.clear();
        let err = p.validate().unwrap_err();
        assert_eq!(err.error_code(), "GW-PLAN-0001");
    }

    #[test]
    fn gate_refuses_stale_and_duplicate_sequences() {
        let source = SourceId::from("ai-core");
        let mut gate = SequenceGate::new();
        assert!(gate.accept(&source, 5));
        assert!(!gate.accept(&source, 5), "duplicate must be refused");
        assert!(!gate.accept(&source, 4), "regression must be refused");
        assert!(gate.accept(&source, 6));
        assert_eq!(gate.last_accepted(&source), Some(6));
    }

    #[test]
    fn gate_tracks_sources_independently() {
        let a = SourceId::from("ai-core");
        let b = SourceId::from("ai-shadow");
        let mut gate = SequenceGate::new();
        assert!(gate.accept(&a, 10));
        assert!(gate.accept(&b, 1));
        assert!(gate.is_fresh(&b, 2));
        assert!(!gate.is_fresh(&a, 10));
    }

    #[test]
    fn proposal_round_trips_through_json() {
        let p = proposal(42);
        let json = serde_json::to_string(&p).unwrap();
        let back: CommandProposal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
