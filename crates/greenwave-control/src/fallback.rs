//! Fixed-time fallback plans.
//!
//! Fallback is the floor the rest of the system stands on, so it is
//! validated once, at startup, against the intersection catalogue. After
//! construction the generator is infallible: every lookup returns a plan
//! that is structurally sound and free of conflicting greens.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, IntersectionSpec};
use crate::ids::{FAILSAFE_PHASE, IntersectionId};
use crate::plan::TimingPlan;

/// Step length of the built-in failsafe plan.
pub const DEFAULT_FALLBACK_STEP_MS: u32 = 30_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// One plan per configured intersection. Required: an intersection
    /// without its own plan is a configuration error, not a runtime
    /// surprise.
    pub plans: BTreeMap<IntersectionId, TimingPlan>,
    /// Served for intersections that appear in traffic but were never
    /// configured. Checked structurally only since there is no catalogue
    /// to check it against.
    pub default_plan: TimingPlan,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            plans: BTreeMap::new(),
            default_plan: TimingPlan::of_phases([(FAILSAFE_PHASE, DEFAULT_FALLBACK_STEP_MS)]),
        }
    }
}

pub(crate) fn validate_config(
    config: &FallbackConfig,
    intersections: &BTreeMap<IntersectionId, IntersectionSpec>,
) -> Result<(), ConfigError> {
    config
        .default_plan
        .validate()
        .map_err(|err| ConfigError::DefaultFallbackPlan {
            detail: err.to_string(),
        })?;
    for (intersection_id, plan) in &config.plans {
        plan.validate().map_err(|err| ConfigError::FallbackPlan {
            intersection_id: intersection_id.to_string(),
            detail: err.to_string(),
        })?;
    }
    for (intersection_id, spec) in intersections {
        let Some(plan) = config.plans.get(intersection_id) else {
            return Err(ConfigError::FallbackPlan {
                intersection_id: intersection_id.to_string(),
                detail: "no fallback plan configured".to_string(),
            });
        };
        spec.check_plan_against_catalogue(plan)
            .map_err(|detail| ConfigError::FallbackPlan {
                intersection_id: intersection_id.to_string(),
                detail,
            })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FallbackGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FallbackGenerator {
    plans: BTreeMap<IntersectionId, TimingPlan>,
    default_plan: TimingPlan,
}

impl FallbackGenerator {
    /// Validates every configured plan against the catalogue. Fails fast;
    /// a control plane must not start with an unusable fallback.
    pub fn new(
        config: FallbackConfig,
        intersections: &BTreeMap<IntersectionId, IntersectionSpec>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config, intersections)?;
        Ok(Self {
            plans: config.plans,
            default_plan: config.default_plan,
        })
    }

    /// Always returns a plan; unknown intersections get the failsafe
    /// default.
    pub fn plan_for(&self, intersection_id: &IntersectionId) -> &TimingPlan {
        self.plans
            .get(intersection_id)
            .unwrap_or(&self.default_plan)
    }

    pub fn default_plan(&self) -> &TimingPlan {
        &self.default_plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PhaseId, SourceId};

    fn catalogue() -> BTreeMap<IntersectionId, IntersectionSpec> {
        let mut spec = IntersectionSpec::new(SourceId::from("ai-core"));
        spec.phases = [PhaseId(0), PhaseId(1), PhaseId(2)].into_iter().collect();
        spec.conflicts = [(PhaseId(1), PhaseId(2))].into_iter().collect();
        let mut intersections = BTreeMap::new();
        intersections.insert(IntersectionId::from("x-main"), spec);
        intersections
    }

    fn good_plan() -> TimingPlan {
        TimingPlan::of_phases([(PhaseId(1), 30_000), (PhaseId(2), 25_000)])
    }

    #[test]
    fn empty_catalogue_accepts_the_default_config() {
        let generator =
            FallbackGenerator::new(FallbackConfig::default(), &BTreeMap::new()).unwrap();
        let plan = generator.plan_for(&IntersectionId::from("anything"));
        assert_eq!(plan, generator.default_plan());
        assert_eq!(
            plan.first_step().unwrap().greens.iter().copied().collect::<Vec<_>>(),
            vec![FAILSAFE_PHASE]
        );
    }

    #[test]
    fn configured_intersection_must_have_a_plan() {
        let err = FallbackGenerator::new(FallbackConfig::default(), &catalogue()).unwrap_err();
        match err {
            ConfigError::FallbackPlan {
                intersection_id,
                detail,
            } => {
                assert_eq!(intersection_id, "x-main");
                assert!(detail.contains("no fallback plan"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn plan_outside_the_catalogue_is_rejected() {
        let mut config = FallbackConfig::default();
        config.plans.insert(
            IntersectionId::from("x-main"),
            TimingPlan::of_phases([(PhaseId(9), 30_000)]),
        );
        let err = FallbackGenerator::new(config, &catalogue()).unwrap_err();
        assert!(matches!(err, ConfigError::FallbackPlan { .. }));
    }

    #[test]
    fn structurally_broken_plan_is_rejected_even_without_a_spec() {
        let mut config = FallbackConfig::default();
        config
            .plans
            .insert(IntersectionId::from("ghost"), TimingPlan::new(Vec::new()));
        let err = FallbackGenerator::new(config, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::FallbackPlan { .. }));
    }

    #[test]
    fn broken_default_plan_is_rejected() {
        let config = FallbackConfig {
            plans: BTreeMap::new(),
            default_plan: TimingPlan::new(Vec::new()),
        };
        let err = FallbackGenerator::new(config, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultFallbackPlan { .. }));
    }

    #[test]
    fn configured_plan_wins_over_the_default() {
        let mut config = FallbackConfig::default();
        config
            .plans
            .insert(IntersectionId::from("x-main"), good_plan());
        let generator = FallbackGenerator::new(config, &catalogue()).unwrap();
        assert_eq!(generator.plan_for(&IntersectionId::from("x-main")), &good_plan());
        assert_eq!(
            generator.plan_for(&IntersectionId::from("elsewhere")),
            generator.default_plan()
        );
    }
}
