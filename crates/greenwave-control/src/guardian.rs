//! Safety filter: rule-based veto with a fail-safe default.
//!
//! The external contract is a single call, `evaluate`, returning a
//! [`VetoDecision`]. Which rules run and at what modeled cost is replaceable
//! behind [`RiskRule`] without touching callers. The fail-safe default is
//! structural: budget exhaustion and rule faults produce an `Override`
//! carrying the fallback substitute, never an implicit accept.

use serde::{Deserialize, Serialize};

use crate::config::IntersectionSpec;
use crate::ids::{IntersectionId, SourceId};
use crate::plan::TimingPlan;
use crate::proposal::CommandProposal;
use crate::snapshot::IntersectionState;

pub(crate) const COMPONENT: &str = "safety_filter";

pub const REASON_CONFLICTING_GREENS: &str = "conflicting_greens";
pub const REASON_DURATION_BOUNDS: &str = "duration_bounds";
pub const REASON_QUEUE_STARVATION: &str = "queue_starvation";
pub const REASON_BUDGET_EXHAUSTED: &str = "budget_exhausted";
pub const REASON_EVALUATION_FAULT: &str = "evaluation_fault";

pub const DEFAULT_LATENCY_BUDGET_MS: u64 = 50;
pub const DEFAULT_RULE_COST_MS: u64 = 2;
pub const DEFAULT_MIN_STEP_MS: u32 = 5_000;
pub const DEFAULT_MAX_STEP_MS: u32 = 120_000;
pub const DEFAULT_MAX_CYCLE_MS: u64 = 300_000;
pub const DEFAULT_QUEUE_OVERLOAD_THRESHOLD: u32 = 40;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Modeled evaluation budget per proposal.
    pub latency_budget_ms: u64,
    pub min_step_ms: u32,
    pub max_step_ms: u32,
    pub max_cycle_ms: u64,
    /// Queue length at which an approach counts as overloaded.
    pub queue_overload_threshold: u32,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            latency_budget_ms: DEFAULT_LATENCY_BUDGET_MS,
            min_step_ms: DEFAULT_MIN_STEP_MS,
            max_step_ms: DEFAULT_MAX_STEP_MS,
            max_cycle_ms: DEFAULT_MAX_CYCLE_MS,
            queue_overload_threshold: DEFAULT_QUEUE_OVERLOAD_THRESHOLD,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation budget
// ---------------------------------------------------------------------------

/// Deterministic cost budget, in modeled milliseconds.
///
/// Every rule evaluation consumes its fixed cost; once the budget cannot
/// cover the next charge, `consume` refuses and stays exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationBudget {
    budget_ms: u64,
    consumed_ms: u64,
}

impl EvaluationBudget {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget_ms,
            consumed_ms: 0,
        }
    }

    pub fn consume(&mut self, cost_ms: u64) -> bool {
        let next = self.consumed_ms.saturating_add(cost_ms);
        if next > self.budget_ms {
            self.consumed_ms = self.budget_ms;
            return false;
        }
        self.consumed_ms = next;
        true
    }

    pub fn consumed_ms(&self) -> u64 {
        self.consumed_ms
    }

    pub fn remaining_ms(&self) -> u64 {
        self.budget_ms.saturating_sub(self.consumed_ms)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// What a rule sees when judging a proposal.
pub struct RuleContext<'a> {
    pub spec: &'a IntersectionSpec,
    /// Canonical state for the intersection, when one exists.
    pub state: Option<&'a IntersectionState>,
    pub config: &'a GuardianConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub reason_code: &'static str,
    pub detail: String,
}

/// An internal rule failure. Treated as grounds for the fail-safe override,
/// never as an accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFault {
    pub rule_id: &'static str,
    pub detail: String,
}

/// One pluggable risk rule.
pub trait RiskRule: Send {
    fn rule_id(&self) -> &'static str;

    /// Modeled evaluation cost charged against both budgets.
    fn cost_ms(&self) -> u64 {
        DEFAULT_RULE_COST_MS
    }

    fn check(
        &self,
        proposal: &CommandProposal,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<RuleViolation>, RuleFault>;
}

/// Rejects plans that display conflicting phases together or reference
/// phases outside the intersection's catalogue.
pub struct ConflictingGreensRule;

impl RiskRule for ConflictingGreensRule {
    fn rule_id(&self) -> &'static str {
        "conflicting_greens"
    }

    fn check(
        &self,
        proposal: &CommandProposal,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<RuleViolation>, RuleFault> {
        Ok(ctx
            .spec
            .check_plan_against_catalogue(&proposal.plan)
            .err()
            .map(|detail| RuleViolation {
                reason_code: REASON_CONFLICTING_GREENS,
                detail,
            }))
    }
}

/// Rejects step durations and cycle lengths outside the configured bounds.
pub struct DurationBoundsRule;

impl RiskRule for DurationBoundsRule {
    fn rule_id(&self) -> &'static str {
        "duration_bounds"
    }

    fn check(
        &self,
        proposal: &CommandProposal,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<RuleViolation>, RuleFault> {
        let config = ctx.config;
        for (index, step) in proposal.plan.steps.iter().enumerate() {
            if step.duration_ms < config.min_step_ms || step.duration_ms > config.max_step_ms {
                return Ok(Some(RuleViolation {
                    reason_code: REASON_DURATION_BOUNDS,
                    detail: format!(
                        "step {index} duration {}ms outside {}..={}ms",
                        step.duration_ms, config.min_step_ms, config.max_step_ms
                    ),
                }));
            }
        }
        let cycle_ms = proposal.plan.cycle_ms();
        if cycle_ms > config.max_cycle_ms {
            return Ok(Some(RuleViolation {
                reason_code: REASON_DURATION_BOUNDS,
                detail: format!(
                    "cycle {cycle_ms}ms exceeds {}ms",
                    config.max_cycle_ms
                ),
            }));
        }
        Ok(None)
    }
}

/// Rejects plans that leave an overloaded approach unserved by the first
/// step. A heuristic, not an optimizer: it only fires when the mapped
/// serving phases are all absent.
pub struct QueueStarvationRule;

impl RiskRule for QueueStarvationRule {
    fn rule_id(&self) -> &'static str {
        "queue_starvation"
    }

    fn check(
        &self,
        proposal: &CommandProposal,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<RuleViolation>, RuleFault> {
        let Some(state) = ctx.state else {
            return Ok(None);
        };
        let Some((approach, queued)) = state.longest_queue() else {
            return Ok(None);
        };
        if queued < ctx.config.queue_overload_threshold {
            return Ok(None);
        }
        let serving = ctx.spec.phases_serving(approach);
        if serving.is_empty() {
            return Ok(None);
        }
        let Some(first) = proposal.plan.first_step() else {
            return Ok(None);
        };
        if first.greens.iter().any(|phase| serving.contains(phase)) {
            return Ok(None);
        }
        Ok(Some(RuleViolation {
            reason_code: REASON_QUEUE_STARVATION,
            detail: format!(
                "approach {approach} queued {queued} but the first step serves none of its phases"
            ),
        }))
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoVerdict {
    Accept,
    Override {
        substitute: TimingPlan,
        reason_code: String,
        rule_id: Option<String>,
        detail: Option<String>,
    },
}

impl VetoVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// The safety filter's complete answer for one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VetoDecision {
    pub intersection_id: IntersectionId,
    pub source_id: SourceId,
    pub proposal_seq: u64,
    pub verdict: VetoVerdict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GuardianStats {
    pub evaluated: u64,
    pub accepted: u64,
    pub vetoed: u64,
    pub faults: u64,
    pub budget_exhaustions: u64,
}

// ---------------------------------------------------------------------------
// Guardian
// ---------------------------------------------------------------------------

pub struct Guardian {
    config: GuardianConfig,
    rules: Vec<Box<dyn RiskRule>>,
    stats: GuardianStats,
}

impl Guardian {
    /// A guardian with the built-in rule set.
    pub fn new(config: GuardianConfig) -> Self {
        Self::with_rules(
            config,
            vec![
                Box::new(ConflictingGreensRule),
                Box::new(DurationBoundsRule),
                Box::new(QueueStarvationRule),
            ],
        )
    }

    pub fn with_rules(config: GuardianConfig, rules: Vec<Box<dyn RiskRule>>) -> Self {
        Self {
            config,
            rules,
            stats: GuardianStats::default(),
        }
    }

    pub fn stats(&self) -> GuardianStats {
        self.stats
    }

    /// Evaluates one proposal. Rules run in registration order; the first
    /// violation, fault, or exhausted budget decides.
    pub fn evaluate(
        &mut self,
        proposal: &CommandProposal,
        state: Option<&IntersectionState>,
        spec: &IntersectionSpec,
        fallback_plan: &TimingPlan,
        tick_budget: &mut EvaluationBudget,
    ) -> VetoDecision {
        self.stats.evaluated = self.stats.evaluated.saturating_add(1);
        let ctx = RuleContext {
            spec,
            state,
            config: &self.config,
        };
        let mut spent_ms = 0u64;
        for rule in &self.rules {
            let cost = rule.cost_ms();
            let over_latency = spent_ms.saturating_add(cost) > self.config.latency_budget_ms;
            if over_latency || !tick_budget.consume(cost) {
                self.stats.budget_exhaustions = self.stats.budget_exhaustions.saturating_add(1);
                return Self::override_decision(
                    proposal,
                    fallback_plan,
                    REASON_BUDGET_EXHAUSTED,
                    None,
                    None,
                );
            }
            spent_ms += cost;
            match rule.check(proposal, &ctx) {
                Ok(None) => {}
                Ok(Some(violation)) => {
                    self.stats.vetoed = self.stats.vetoed.saturating_add(1);
                    return Self::override_decision(
                        proposal,
                        fallback_plan,
                        violation.reason_code,
                        Some(rule.rule_id()),
                        Some(violation.detail),
                    );
                }
                Err(fault) => {
                    self.stats.faults = self.stats.faults.saturating_add(1);
                    return Self::override_decision(
                        proposal,
                        fallback_plan,
                        REASON_EVALUATION_FAULT,
                        Some(fault.rule_id),
                        Some(fault.detail),
                    );
                }
            }
        }
        self.stats.accepted = self.stats.accepted.saturating_add(1);
        VetoDecision {
            intersection_id: proposal.intersection_id.clone(),
            source_id: proposal.source_id.clone(),
            proposal_seq: proposal.seq,
            verdict: VetoVerdict::Accept,
        }
    }

    fn override_decision(
        proposal: &CommandProposal,
        fallback_plan: &TimingPlan,
        reason_code: &str,
        rule_id: Option<&str>,
        detail: Option<String>,
    ) -> VetoDecision {
        VetoDecision {
            intersection_id: proposal.intersection_id.clone(),
            source_id: proposal.source_id.clone(),
            proposal_seq: proposal.seq,
            verdict: VetoVerdict::Override {
                substitute: fallback_plan.clone(),
                reason_code: reason_code.to_string(),
                rule_id: rule_id.map(str::to_string),
                detail,
            },
        }
    }
}
