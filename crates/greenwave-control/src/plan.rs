//! Signal timing plans and their structural validation.
//!
//! A [`TimingPlan`] is the unit every command in the system carries: the
//! fixed-time fallback, every proposal from a command source, and every
//! guardian substitute are all plans. Structural validation here is the
//! first line of the malformed-message defense; semantic checks against an
//! intersection's phase catalogue live with the safety filter and the
//! configuration validator.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::PhaseId;

/// Hard cap on plan length; anything longer is malformed, not ambitious.
pub const MAX_PLAN_STEPS: usize = 64;

// ---------------------------------------------------------------------------
// Plan value types
// ---------------------------------------------------------------------------

/// One step of a timing plan: the set of phases displayed green together and
/// for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub greens: BTreeSet<PhaseId>,
    pub duration_ms: u32,
}

impl PlanStep {
    pub fn new<I: IntoIterator<Item = PhaseId>>(greens: I, duration_ms: u32) -> Self {
        Self {
            greens: greens.into_iter().collect(),
            duration_ms,
        }
    }
}

/// A cyclic signal timing plan: steps run in order, then repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPlan {
    pub steps: Vec<PlanStep>,
}

impl TimingPlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// Convenience constructor for single-phase-per-step plans.
    pub fn of_phases<I: IntoIterator<Item = (PhaseId, u32)>>(steps: I) -> Self {
        Self {
            steps: steps
                .into_iter()
                .map(|(phase, duration_ms)| PlanStep::new([phase], duration_ms))
                .collect(),
        }
    }

    /// Total cycle length in milliseconds, saturating on overflow.
    pub fn cycle_ms(&self) -> u64 {
        self.steps
            .iter()
            .fold(0u64, |acc, step| acc.saturating_add(u64::from(step.duration_ms)))
    }

    pub fn first_step(&self) -> Option<&PlanStep> {
        self.steps.first()
    }

    /// Structural validation: shape only, no catalogue knowledge.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(PlanValidationError::TooManySteps {
                actual: self.steps.len(),
            });
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.greens.is_empty() {
                return Err(PlanValidationError::EmptyGreens { step: index });
            }
            if step.duration_ms == 0 {
                return Err(PlanValidationError::ZeroDuration { step: index });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Structural validation errors
// ---------------------------------------------------------------------------

/// Why a plan failed structural validation.
///
/// Error codes are stable and safe to alert on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanValidationError {
    /// The plan has no steps at all.
    EmptyPlan,
    /// The plan exceeds [`MAX_PLAN_STEPS`].
    TooManySteps { actual: usize },
    /// A step displays no phase.
    EmptyGreens { step: usize },
    /// A step has a zero duration.
    ZeroDuration { step: usize },
}

impl PlanValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyPlan => "GW-PLAN-0001",
            Self::TooManySteps { .. } => "GW-PLAN-0002",
            Self::EmptyGreens { .. } => "GW-PLAN-0003",
            Self::ZeroDuration { .. } => "GW-PLAN-0004",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::EmptyPlan => "plan has no steps".to_string(),
            Self::TooManySteps { actual } => {
                format!("plan has {actual} steps, maximum is {MAX_PLAN_STEPS}")
            }
            Self::EmptyGreens { step } => format!("step {step} displays no phase"),
            Self::ZeroDuration { step } => format!("step {step} has zero duration"),
        }
    }
}

impl fmt::Display for PlanValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.error_code())
    }
}

impl std::error::Error for PlanValidationError {}
