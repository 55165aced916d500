//! Control plane configuration.
//!
//! One [`ControlConfig`] document drives the whole plane: per-component
//! tuning knobs plus the intersection catalogue that the safety filter and
//! the fallback validator both check against. Configuration is parsed from
//! JSON and validated in full before anything starts; a bad document is a
//! startup failure, never a degraded run.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::autonomy::GovernorConfig;
use crate::fallback::{self, FallbackConfig};
use crate::feed::FeedConfig;
use crate::guardian::GuardianConfig;
use crate::ids::{IntersectionId, PhaseId, SourceId};
use crate::liveness::LivenessConfig;
use crate::plan::TimingPlan;
use crate::proposal::MILLION;
use crate::snapshot::MAX_APPROACH_NAME_LEN;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_TICK_BUDGET_MS: u64 = 100;
pub const DEFAULT_MAX_PENDING_SUBMISSIONS: usize = 10_000;
pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 10_000;
pub const DEFAULT_SNAPSHOT_STALE_AFTER_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} {requirement}")]
    Field {
        field: &'static str,
        requirement: &'static str,
    },
    #[error("intersection {intersection_id}: {detail}")]
    Intersection {
        intersection_id: String,
        detail: String,
    },
    #[error("fallback plan for intersection {intersection_id}: {detail}")]
    FallbackPlan {
        intersection_id: String,
        detail: String,
    },
    #[error("default fallback plan: {detail}")]
    DefaultFallbackPlan { detail: String },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "GW-CONFIG-0001",
            Self::Field { .. } => "GW-CONFIG-0002",
            Self::Intersection { .. } => "GW-CONFIG-0003",
            Self::FallbackPlan { .. } => "GW-CONFIG-0004",
            Self::DefaultFallbackPlan { .. } => "GW-CONFIG-0005",
        }
    }
}

fn require(
    condition: bool,
    field: &'static str,
    requirement: &'static str,
) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Field { field, requirement })
    }
}

// ---------------------------------------------------------------------------
// Intersection catalogue
// ---------------------------------------------------------------------------

/// Static description of one intersection: which source commands it, which
/// phases exist, which phase pairs must never be green together, and which
/// approaches each phase serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionSpec {
    /// The command source authorized to propose plans here.
    pub owner: SourceId,
    #[serde(default)]
    pub phases: BTreeSet<PhaseId>,
    /// Unordered conflict pairs; both orders are honored when checking.
    #[serde(default)]
    pub conflicts: BTreeSet<(PhaseId, PhaseId)>,
    /// Approach names served by each phase, used by the starvation rule.
    #[serde(default)]
    pub phase_serves: BTreeMap<PhaseId, BTreeSet<String>>,
    /// Expected total queue under the fixed-time plan, the baseline for
    /// performance comparison. `None` disables the comparison.
    #[serde(default)]
    pub baseline_queue_total: Option<u32>,
}

impl IntersectionSpec {
    pub fn new(owner: SourceId) -> Self {
        Self {
            owner,
            phases: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            phase_serves: BTreeMap::new(),
            baseline_queue_total: None,
        }
    }

    pub fn conflicts_with(&self, a: PhaseId, b: PhaseId) -> bool {
        self.conflicts.contains(&(a, b)) || self.conflicts.contains(&(b, a))
    }

    /// Phases that serve the named approach.
    pub fn phases_serving(&self, approach: &str) -> BTreeSet<PhaseId> {
        self.phase_serves
            .iter()
            .filter(|(_, approaches)| approaches.contains(approach))
            .map(|(phase, _)| *phase)
            .collect()
    }

    /// Semantic plan check: every phase must exist in the catalogue and no
    /// step may green a conflicting pair together.
    pub fn check_plan_against_catalogue(&self, plan: &TimingPlan) -> Result<(), String> {
        for (index, step) in plan.steps.iter().enumerate() {
            for phase in &step.greens {
                if !self.phases.contains(phase) {
                    return Err(format!(
                        "step {index} uses phase {phase} which is not in the catalogue"
                    ));
                }
            }
            let greens: Vec<PhaseId> = step.greens.iter().copied().collect();
            for (i, a) in greens.iter().enumerate() {
                for b in &greens[i + 1..] {
                    if self.conflicts_with(*a, *b) {
                        return Err(format!(
                            "step {index} greens conflicting phases {a} and {b} together"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        if self.owner.is_empty() {
            return Err("owner source id is empty".to_string());
        }
        if self.phases.is_empty() {
            return Err("phase catalogue is empty".to_string());
        }
        for (a, b) in &self.conflicts {
            if a == b {
                return Err(format!("phase {a} conflicts with itself"));
            }
            if !self.phases.contains(a) || !self.phases.contains(b) {
                return Err(format!(
                    "conflict pair ({a}, {b}) references a phase outside the catalogue"
                ));
            }
        }
        for (phase, approaches) in &self.phase_serves {
            if !self.phases.contains(phase) {
                return Err(format!(
                    "phase_serves references phase {phase} outside the catalogue"
                ));
            }
            for approach in approaches {
                if approach.is_empty() || approach.len() > MAX_APPROACH_NAME_LEN {
                    return Err(format!(
                        "phase {phase} serves an approach with an invalid name"
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tick loop knobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Arbitration cadence.
    pub tick_interval_ms: u64,
    /// Modeled guardian evaluation budget per tick.
    pub tick_budget_ms: u64,
    /// Buffered submissions kept between ticks before drop-oldest.
    pub max_pending_submissions: usize,
    /// Structured event ring size.
    pub max_buffered_events: usize,
    /// Snapshot age at which a tick flags the input feed as quiet.
    pub snapshot_stale_after_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            tick_budget_ms: DEFAULT_TICK_BUDGET_MS,
            max_pending_submissions: DEFAULT_MAX_PENDING_SUBMISSIONS,
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            snapshot_stale_after_ms: DEFAULT_SNAPSHOT_STALE_AFTER_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub liveness: LivenessConfig,
    pub guardian: GuardianConfig,
    pub governor: GovernorConfig,
    pub fallback: FallbackConfig,
    pub tick: TickConfig,
    pub feed: FeedConfig,
    pub intersections: BTreeMap<IntersectionId, IntersectionSpec>,
}

impl ControlConfig {
    /// Parses and fully validates a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require(
            self.tick.tick_interval_ms > 0,
            "tick.tick_interval_ms",
            "must be positive",
        )?;
        require(
            self.tick.tick_budget_ms > 0,
            "tick.tick_budget_ms",
            "must be positive",
        )?;
        require(
            self.tick.max_pending_submissions > 0,
            "tick.max_pending_submissions",
            "must be positive",
        )?;
        require(
            self.tick.max_buffered_events > 0,
            "tick.max_buffered_events",
            "must be positive",
        )?;
        require(
            self.tick.snapshot_stale_after_ms > 0,
            "tick.snapshot_stale_after_ms",
            "must be positive",
        )?;
        require(
            self.feed.subscriber_queue_depth > 0,
            "feed.subscriber_queue_depth",
            "must be positive",
        )?;

        require(
            self.liveness.heartbeat_interval_ms > 0,
            "liveness.heartbeat_interval_ms",
            "must be positive",
        )?;
        require(
            self.liveness.suspect_after_misses > 0,
            "liveness.suspect_after_misses",
            "must be positive",
        )?;
        require(
            self.liveness.unresponsive_after_misses > self.liveness.suspect_after_misses,
            "liveness.unresponsive_after_misses",
            "must exceed suspect_after_misses",
        )?;
        require(
            self.liveness.recovery_streak > 0,
            "liveness.recovery_streak",
            "must be positive",
        )?;

        require(
            self.guardian.latency_budget_ms > 0,
            "guardian.latency_budget_ms",
            "must be positive",
        )?;
        require(
            self.guardian.min_step_ms > 0,
            "guardian.min_step_ms",
            "must be positive",
        )?;
        require(
            self.guardian.min_step_ms <= self.guardian.max_step_ms,
            "guardian.min_step_ms",
            "must not exceed max_step_ms",
        )?;
        require(
            self.guardian.max_cycle_ms >= u64::from(self.guardian.max_step_ms),
            "guardian.max_cycle_ms",
            "must cover at least one maximum-length step",
        )?;
        require(
            self.guardian.queue_overload_threshold > 0,
            "guardian.queue_overload_threshold",
            "must be positive",
        )?;

        require(
            self.governor.observer_promotion_window > 0,
            "governor.observer_promotion_window",
            "must be positive",
        )?;
        require(
            self.governor.supervised_promotion_window > 0,
            "governor.supervised_promotion_window",
            "must be positive",
        )?;
        require(
            (0..=MILLION).contains(&self.governor.confidence_floor_millionths),
            "governor.confidence_floor_millionths",
            "must be within 0..=1000000",
        )?;
        require(
            (0..=MILLION).contains(&self.governor.performance_margin_millionths),
            "governor.performance_margin_millionths",
            "must be within 0..=1000000",
        )?;
        if let Some(policy) = &self.governor.low_confidence_demotion {
            require(
                (0..=MILLION).contains(&policy.floor_millionths),
                "governor.low_confidence_demotion.floor_millionths",
                "must be within 0..=1000000",
            )?;
            require(
                policy.run_length > 0,
                "governor.low_confidence_demotion.run_length",
                "must be positive",
            )?;
        }

        for (intersection_id, spec) in &self.intersections {
            require(
                !intersection_id.is_empty(),
                "intersections",
                "must not contain an empty intersection id",
            )?;
            spec.validate().map_err(|detail| ConfigError::Intersection {
                intersection_id: intersection_id.to_string(),
                detail,
            })?;
        }

        fallback::validate_config(&self.fallback, &self.intersections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanStep;

    fn spec_with_phases(phases: &[u16]) -> IntersectionSpec {
        let mut spec = IntersectionSpec::new(SourceId::from("ai-core"));
        spec.phases = phases.iter().map(|p| PhaseId(*p)).collect();
        spec
    }

    fn config_with_one_intersection() -> ControlConfig {
        let mut spec = spec_with_phases(&[0, 1, 2]);
        spec.conflicts.insert((PhaseId(1), PhaseId(2)));
        spec.phase_serves
            .insert(PhaseId(1), ["north".to_string()].into_iter().collect());
        let mut config = ControlConfig::default();
        config
            .intersections
            .insert(IntersectionId::from("x-main"), spec);
        config.fallback.plans.insert(
            IntersectionId::from("x-main"),
            TimingPlan::of_phases([(PhaseId(1), 30_000), (PhaseId(2), 30_000)]),
        );
        config
    }

    #[test]
    fn default_config_is_valid() {
        ControlConfig::default().validate().unwrap();
    }

    #[test]
    fn full_config_round_trips_through_json() {
        let config = config_with_one_intersection();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back = ControlConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn sparse_document_fills_in_defaults() {
        let config = ControlConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ControlConfig::default());

        let config = ControlConfig::from_json_str(
            r#"{"tick": {"tick_interval_ms": 250}}"#,
        )
        .unwrap();
        assert_eq!(config.tick.tick_interval_ms, 250);
        assert_eq!(config.tick.tick_budget_ms, DEFAULT_TICK_BUDGET_MS);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ControlConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert_eq!(err.error_code(), "GW-CONFIG-0001");
    }

    #[test]
    fn threshold_ordering_is_enforced() {
        let mut config = ControlConfig::default();
        config.liveness.suspect_after_misses = 3;
        config.liveness.unresponsive_after_misses = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Field {
                field: "liveness.unresponsive_after_misses",
                ..
            }
        ));
        assert_eq!(err.error_code(), "GW-CONFIG-0002");
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let mut config = ControlConfig::default();
        config.tick.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn intersection_with_dangling_conflict_is_rejected() {
        let mut config = config_with_one_intersection();
        config
            .intersections
            .get_mut(&IntersectionId::from("x-main"))
            .unwrap()
            .conflicts
            .insert((PhaseId(1), PhaseId(9)));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Intersection { .. }));
        assert_eq!(err.error_code(), "GW-CONFIG-0003");
    }

    #[test]
    fn missing_fallback_plan_fails_validation() {
        let mut config = config_with_one_intersection();
        config.fallback.plans.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::FallbackPlan { .. }));
    }

    #[test]
    fn conflicting_plan_step_is_caught_by_the_catalogue_check() {
        let mut spec = spec_with_phases(&[1, 2]);
        spec.conflicts.insert((PhaseId(1), PhaseId(2)));
        let plan = TimingPlan::new(vec![PlanStep::new([PhaseId(1), PhaseId(2)], 20_000)]);
        let err = spec.check_plan_against_catalogue(&plan).unwrap_err();
        assert!(err.contains("conflicting phases"), "{err}");

        let sequential = TimingPlan::of_phases([(PhaseId(1), 20_000), (PhaseId(2), 20_000)]);
        spec.check_plan_against_catalogue(&sequential).unwrap();
    }

    #[test]
    fn phases_serving_scans_the_mapping() {
        let mut spec = spec_with_phases(&[1, 2, 3]);
        spec.phase_serves.insert(
            PhaseId(1),
            ["north".to_string(), "south".to_string()].into_iter().collect(),
        );
        spec.phase_serves
            .insert(PhaseId(3), ["north".to_string()].into_iter().collect());
        assert_eq!(
            spec.phases_serving("north"),
            [PhaseId(1), PhaseId(3)].into_iter().collect()
        );
        assert!(spec.phases_serving("west").is_empty());
    }
}
