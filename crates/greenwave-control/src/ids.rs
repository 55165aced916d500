//! Stable identifiers shared across the control plane.
//!
//! Every id is a thin newtype with deterministic ordering and a stable
//! string form, so the same value can key a `BTreeMap`, appear verbatim in
//! structured events, and round-trip through the wire formats unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// IntersectionId: one signalized intersection
// ---------------------------------------------------------------------------

/// Identifier of one signalized intersection in the network.
///
/// Intersection ids are opaque strings assigned by the field adapter; the
/// control plane never parses them, it only compares and logs them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntersectionId(String);

impl IntersectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntersectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// SourceId: one command source process
// ---------------------------------------------------------------------------

/// Identifier of a command source process (the intelligent controller, or a
/// test double standing in for it).
///
/// Liveness state, heartbeat bookkeeping, and proposal sequence numbers are
/// all tracked per `SourceId`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// PhaseId: one signal phase
// ---------------------------------------------------------------------------

/// One signal phase: a group of movements that may be displayed green
/// together.
///
/// Phase numbering follows the intersection's controller configuration.
/// Phase `0` is reserved for the failsafe program (all-red or flash) and is
/// the only phase guaranteed to exist at every intersection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PhaseId(pub u16);

/// The reserved failsafe phase present at every intersection.
pub const FAILSAFE_PHASE: PhaseId = PhaseId(0);

impl PhaseId {
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SubscriberId: one feed subscriber
// ---------------------------------------------------------------------------

/// Identifier of a published-feed subscriber (dashboard, persistence,
/// explainability consumer).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_ids_order_deterministically() {
        let mut ids = vec![
            IntersectionId::from("x-9"),
            IntersectionId::from("x-10"),
            IntersectionId::from("a-1"),
        ];
        ids.sort();
        let rendered: Vec<&str> = ids.iter().map(IntersectionId::as_str).collect();
        assert_eq!(rendered, ["a-1", "x-10", "x-9"]);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = SourceId::from("ai-core");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ai-core\"");
        let back: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phase_ids_serialize_as_numbers() {
        let json = serde_json::to_string(&PhaseId(4)).unwrap();
        assert_eq!(json, "4");
        let back: PhaseId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PhaseId(4));
    }

    #[test]
    fn display_matches_as_str() {
        let id = IntersectionId::from("main-and-5th");
        assert_eq!(id.to_string(), id.as_str());
        assert_eq!(FAILSAFE_PHASE.to_string(), "0");
    }
}
