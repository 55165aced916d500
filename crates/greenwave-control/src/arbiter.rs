//! Arbitration core: the single writer of canonical state.
//!
//! One [`ControlPlane`] owns the canonical network view, the liveness
//! monitor, the safety filter, the autonomy governor, the fallback
//! generator, and the subscriber feed. Inputs arrive through `ingest`,
//! `submit`, and `heartbeat`; `tick` consumes everything buffered and
//! produces exactly one [`AppliedCommand`] per configured intersection.
//!
//! The selection rule per intersection is a strict priority order:
//! 1. operator hold active, apply the fallback plan;
//! 2. owning source unavailable, apply the fallback plan;
//! 3. proposal vetoed or evaluation failed, apply the substitute;
//! 4. autonomy level withholds authority, apply the fallback plan;
//! 5. otherwise apply the proposal.
//!
//! Exactly one branch fires, so every command is attributable to exactly
//! one of [`AppliedVia`]'s variants. No failure on any path is fatal to
//! the tick loop; every error resolves to a safe command and a structured
//! event.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::autonomy::{
    AutonomyGovernor, AutonomyLevel, AutonomyRecord, AutonomyTransition, RestoreStats,
    TickOutcome,
};
use crate::config::{ConfigError, ControlConfig, IntersectionSpec};
use crate::fallback::FallbackGenerator;
use crate::feed::FeedHub;
use crate::guardian::{
    EvaluationBudget, Guardian, GuardianStats, VetoVerdict, REASON_BUDGET_EXHAUSTED,
    REASON_EVALUATION_FAULT,
};
use crate::ids::{IntersectionId, SourceId, SubscriberId};
use crate::liveness::{LivenessMonitor, LivenessState, LivenessTransition};
use crate::plan::TimingPlan;
use crate::proposal::{CommandProposal, ProposalValidationError, SequenceGate, MILLION};
use crate::snapshot::{IntersectionState, NetworkSnapshot, SnapshotValidationError};
use crate::store::{sha256_hex, AutonomyStore};

pub(crate) const COMPONENT: &str = "arbitration_core";

/// Consecutive failed governance writes tolerated before the conservative
/// demotion fires.
pub const STORE_FAILURES_BEFORE_DEMOTION: u32 = 2;

pub const REASON_SOURCE_UNRESPONSIVE: &str = "source_unresponsive";
pub const REASON_SOURCE_DISABLED: &str = "source_disabled";
pub const REASON_OPERATOR_HOLD: &str = "operator_hold";
pub const REASON_NO_PROPOSAL: &str = "no_proposal";
pub const REASON_OBSERVER_MODE: &str = "observer_mode";
pub const REASON_SUPERVISED_OUT_OF_WINDOW: &str = "supervised_out_of_window";

// ---------------------------------------------------------------------------
// Applied commands and tick records
// ---------------------------------------------------------------------------

/// Which branch of the selection rule produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedVia {
    /// Branch 5: the source's proposal was applied unchanged.
    Source,
    /// Branch 3: the safety filter substituted the fallback plan.
    Override,
    /// Branch 1, 2, or missing input: fallback with no proposal in play.
    Fallback,
    /// Branch 4: a live, un-vetoed proposal withheld by governance.
    ObserverFallback,
}

impl AppliedVia {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Override => "override",
            Self::Fallback => "fallback",
            Self::ObserverFallback => "observer_fallback",
        }
    }

    pub const fn all() -> [AppliedVia; 4] {
        [
            Self::Source,
            Self::Override,
            Self::Fallback,
            Self::ObserverFallback,
        ]
    }
}

/// The one command applied to one intersection in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCommand {
    pub intersection_id: IntersectionId,
    pub plan: TimingPlan,
    pub applied_via: AppliedVia,
    /// Why a non-`Source` branch fired; `None` for applied proposals.
    pub reason_code: Option<String>,
    /// The proposing source, when a proposal was in play.
    pub source_id: Option<SourceId>,
    pub proposal_seq: Option<u64>,
    pub confidence_millionths: Option<i64>,
    /// Autonomy level at decision time.
    pub autonomy_level: AutonomyLevel,
}

/// Everything one arbitration pass committed: the canonical snapshot, one
/// command per configured intersection, and the state transitions observed
/// along the way. This is the record published to feed subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    pub tick_ms: u64,
    pub snapshot: NetworkSnapshot,
    pub commands: Vec<AppliedCommand>,
    pub autonomy_transitions: Vec<AutonomyTransition>,
    pub liveness_transitions: Vec<LivenessTransition>,
    /// Content digest over the applied commands, for audit chains.
    pub digest: String,
}

impl TickRecord {
    pub fn new(
        tick_ms: u64,
        snapshot: NetworkSnapshot,
        commands: Vec<AppliedCommand>,
        autonomy_transitions: Vec<AutonomyTransition>,
        liveness_transitions: Vec<LivenessTransition>,
    ) -> Self {
        let digest = Self::compute_digest(tick_ms, &commands);
        Self {
            tick_ms,
            snapshot,
            commands,
            autonomy_transitions,
            liveness_transitions,
            digest,
        }
    }

    pub fn command_for(&self, intersection_id: &IntersectionId) -> Option<&AppliedCommand> {
        self.commands
            .iter()
            .find(|c| &c.intersection_id == intersection_id)
    }

    fn compute_digest(tick_ms: u64, commands: &[AppliedCommand]) -> String {
        // Canonical JSON of the full commands; two plans sharing a cycle
        // length must not collide.
        let commands_json =
            serde_json::to_vec(commands).expect("applied commands should serialize");
        let mut canonical = format!("tick:{tick_ms}|").into_bytes();
        canonical.extend(commands_json);
        sha256_hex(&canonical)
    }
}

// ---------------------------------------------------------------------------
// Structured events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Info,
    Warn,
    Failure,
}

impl EventOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Failure => "failure",
        }
    }
}

/// One structured observability event. Events are buffered in a bounded
/// ring and handed out through [`ControlPlane::drain_events`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlEvent {
    pub seq: u64,
    pub at_ms: u64,
    pub component: &'static str,
    pub event: &'static str,
    pub outcome: EventOutcome,
    pub intersection_id: Option<IntersectionId>,
    pub source_id: Option<SourceId>,
    pub detail: Option<String>,
    pub error_code: Option<&'static str>,
}

impl ControlEvent {
    pub fn new(
        at_ms: u64,
        component: &'static str,
        event: &'static str,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            seq: 0,
            at_ms,
            component,
            event,
            outcome,
            intersection_id: None,
            source_id: None,
            detail: None,
            error_code: None,
        }
    }

    pub fn with_intersection(mut self, intersection_id: &IntersectionId) -> Self {
        self.intersection_id = Some(intersection_id.clone());
        self
    }

    pub fn with_source(mut self, source_id: &SourceId) -> Self {
        self.source_id = Some(source_id.clone());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_error_code(mut self, error_code: &'static str) -> Self {
        self.error_code = Some(error_code);
        self
    }
}

// ---------------------------------------------------------------------------
// Ingestion and submission errors
// ---------------------------------------------------------------------------

/// Why a snapshot was refused at ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Structural validation failed; the snapshot never touched canonical
    /// state.
    Invalid(SnapshotValidationError),
    /// The snapshot's tick timestamp is older than the canonical one.
    Stale {
        incoming_tick_ms: u64,
        current_tick_ms: u64,
    },
}

impl IngestError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(inner) => inner.error_code(),
            Self::Stale { .. } => "GW-INGEST-0001",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Invalid(inner) => format!("snapshot failed validation: {}", inner.message()),
            Self::Stale {
                incoming_tick_ms,
                current_tick_ms,
            } => format!(
                "snapshot tick {incoming_tick_ms} is older than canonical tick {current_tick_ms}"
            ),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.error_code())
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(inner) => Some(inner),
            Self::Stale { .. } => None,
        }
    }
}

/// Why a proposal was refused at submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    Invalid(ProposalValidationError),
    UnknownIntersection { intersection_id: IntersectionId },
    NotOwner {
        intersection_id: IntersectionId,
        source_id: SourceId,
        owner: SourceId,
    },
    SourceDisabled { source_id: SourceId },
    /// Sequence number at or below the last accepted one for the source.
    StaleSequence {
        source_id: SourceId,
        seq: u64,
        last_accepted: u64,
    },
}

impl SubmitError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(inner) => inner.error_code(),
            Self::UnknownIntersection { .. } => "GW-SUBMIT-0001",
            Self::NotOwner { .. } => "GW-SUBMIT-0002",
            Self::SourceDisabled { .. } => "GW-SUBMIT-0003",
            Self::StaleSequence { .. } => "GW-SUBMIT-0004",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Invalid(inner) => format!("proposal failed validation: {}", inner.message()),
            Self::UnknownIntersection { intersection_id } => {
                format!("proposal names unknown intersection {intersection_id}")
            }
            Self::NotOwner {
                intersection_id,
                source_id,
                owner,
            } => format!(
                "source {source_id} is not the configured owner of intersection \
                 {intersection_id}; owner is {owner}"
            ),
            Self::SourceDisabled { source_id } => {
                format!("source {source_id} is administratively disabled")
            }
            Self::StaleSequence {
                source_id,
                seq,
                last_accepted,
            } => format!(
                "sequence {seq} from source {source_id} is not newer than {last_accepted}"
            ),
        }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.error_code())
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(inner) => Some(inner),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    pub ticks: u64,
    pub commands_applied: u64,
    pub source_applied: u64,
    pub overrides: u64,
    pub fallbacks: u64,
    pub observer_fallbacks: u64,
    pub snapshots_ingested: u64,
    pub snapshots_rejected: u64,
    pub proposals_submitted: u64,
    pub proposals_rejected: u64,
    pub proposals_superseded: u64,
    pub proposals_discarded: u64,
    pub submissions_dropped: u64,
    pub heartbeats_recorded: u64,
    pub feed_records_dropped: u64,
    pub events_dropped: u64,
    pub store_failures: u64,
}

// ---------------------------------------------------------------------------
// ControlPlane
// ---------------------------------------------------------------------------

pub struct ControlPlane {
    config: ControlConfig,
    liveness: LivenessMonitor,
    guardian: Guardian,
    governor: AutonomyGovernor,
    fallback: FallbackGenerator,
    feed: FeedHub,
    sequence_gate: SequenceGate,
    store: Box<dyn AutonomyStore>,
    canonical: BTreeMap<IntersectionId, IntersectionState>,
    last_snapshot_tick_ms: u64,
    last_ingest_at_ms: Option<u64>,
    snapshot_stale_flagged: bool,
    pending: VecDeque<CommandProposal>,
    held: BTreeSet<IntersectionId>,
    unknown_intersections: BTreeSet<IntersectionId>,
    last_persisted: Option<BTreeMap<IntersectionId, AutonomyRecord>>,
    consecutive_store_failures: u32,
    store_demotion_fired: bool,
    events: VecDeque<ControlEvent>,
    next_event_seq: u64,
    stats: ArbiterStats,
}

impl ControlPlane {
    /// Builds the plane from validated configuration and restores persisted
    /// governance state. A load failure is not fatal: every intersection
    /// simply starts at `Observer`, which is the conservative floor.
    pub fn new(
        config: ControlConfig,
        store: Box<dyn AutonomyStore>,
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let fallback = FallbackGenerator::new(config.fallback.clone(), &config.intersections)?;

        let mut liveness = LivenessMonitor::new(config.liveness.clone());
        let mut governor = AutonomyGovernor::new(config.governor.clone());
        for (intersection_id, spec) in &config.intersections {
            liveness.register_source(&spec.owner, now_ms);
            governor.register(intersection_id, now_ms);
        }

        let guardian = Guardian::new(config.guardian.clone());
        let feed = FeedHub::new(config.feed);
        let max_events = config.tick.max_buffered_events;

        let mut plane = Self {
            config,
            liveness,
            guardian,
            governor,
            fallback,
            feed,
            sequence_gate: SequenceGate::new(),
            store,
            canonical: BTreeMap::new(),
            last_snapshot_tick_ms: 0,
            last_ingest_at_ms: None,
            snapshot_stale_flagged: false,
            pending: VecDeque::new(),
            held: BTreeSet::new(),
            unknown_intersections: BTreeSet::new(),
            last_persisted: None,
            consecutive_store_failures: 0,
            store_demotion_fired: false,
            events: VecDeque::with_capacity(max_events.min(1_024)),
            next_event_seq: 0,
            stats: ArbiterStats::default(),
        };

        match plane.store.load() {
            Ok(Some(records)) => {
                let restored = plane.governor.restore(records);
                plane.last_persisted = Some(plane.governor.state_snapshot());
                plane.push_event(
                    ControlEvent::new(
                        now_ms,
                        crate::autonomy::COMPONENT,
                        "governance_restored",
                        EventOutcome::Info,
                    )
                    .with_detail(format!(
                        "{} records restored, {} replaced registrations",
                        restored.applied, restored.overwritten
                    )),
                );
            }
            Ok(None) => {
                plane.last_persisted = Some(plane.governor.state_snapshot());
                plane.push_event(ControlEvent::new(
                    now_ms,
                    crate::autonomy::COMPONENT,
                    "governance_fresh_start",
                    EventOutcome::Info,
                ));
            }
            Err(err) => {
                plane.stats.store_failures = plane.stats.store_failures.saturating_add(1);
                plane.push_event(
                    ControlEvent::new(
                        now_ms,
                        crate::autonomy::COMPONENT,
                        "governance_restore_failed",
                        EventOutcome::Failure,
                    )
                    .with_detail(err.to_string())
                    .with_error_code(err.error_code()),
                );
            }
        }

        Ok(plane)
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn stats(&self) -> ArbiterStats {
        self.stats
    }

    pub fn guardian_stats(&self) -> GuardianStats {
        self.guardian.stats()
    }

    pub fn autonomy_level(&self, intersection_id: &IntersectionId) -> AutonomyLevel {
        self.governor.level_for(intersection_id)
    }

    pub fn liveness_state(&self, source_id: &SourceId) -> Option<LivenessState> {
        self.liveness.state_of(source_id)
    }

    pub fn canonical_state(&self, intersection_id: &IntersectionId) -> Option<&IntersectionState> {
        self.canonical.get(intersection_id)
    }

    // -- input surface ------------------------------------------------------

    /// Merges a validated snapshot into canonical state. Stale snapshots
    /// are refused; replaying the current one is an idempotent no-op.
    pub fn ingest(&mut self, snapshot: NetworkSnapshot, now_ms: u64) -> Result<(), IngestError> {
        if let Err(inner) = snapshot.validate() {
            return self.reject_snapshot(IngestError::Invalid(inner), now_ms);
        }
        if snapshot.tick_ms < self.last_snapshot_tick_ms {
            let error = IngestError::Stale {
                incoming_tick_ms: snapshot.tick_ms,
                current_tick_ms: self.last_snapshot_tick_ms,
            };
            return self.reject_snapshot(error, now_ms);
        }
        self.last_snapshot_tick_ms = snapshot.tick_ms;
        self.last_ingest_at_ms = Some(now_ms);
        self.snapshot_stale_flagged = false;
        for (intersection_id, state) in snapshot.intersections {
            if !self.config.intersections.contains_key(&intersection_id)
                && self.unknown_intersections.insert(intersection_id.clone())
            {
                self.push_event(
                    ControlEvent::new(now_ms, COMPONENT, "unknown_intersection", EventOutcome::Warn)
                        .with_intersection(&intersection_id)
                        .with_detail(
                            "intersection absent from the catalogue; no commands will be issued",
                        ),
                );
            }
            self.canonical.insert(intersection_id, state);
        }
        self.stats.snapshots_ingested = self.stats.snapshots_ingested.saturating_add(1);
        Ok(())
    }

    /// Buffers a proposal for the next tick. The buffer is consumed
    /// atomically at tick start; an overfull buffer drops its oldest entry.
    pub fn submit(&mut self, proposal: CommandProposal, now_ms: u64) -> Result<(), SubmitError> {
        if let Err(inner) = proposal.validate() {
            let error = SubmitError::Invalid(inner);
            return self.reject_proposal(
                &proposal.intersection_id,
                &proposal.source_id,
                error,
                now_ms,
            );
        }
        let owner = match self.config.intersections.get(&proposal.intersection_id) {
            Some(spec) => spec.owner.clone(),
            None => {
                let error = SubmitError::UnknownIntersection {
                    intersection_id: proposal.intersection_id.clone(),
                };
                return self.reject_proposal(
                    &proposal.intersection_id,
                    &proposal.source_id,
                    error,
                    now_ms,
                );
            }
        };
        if proposal.source_id != owner {
            let error = SubmitError::NotOwner {
                intersection_id: proposal.intersection_id.clone(),
                source_id: proposal.source_id.clone(),
                owner,
            };
            return self.reject_proposal(
                &proposal.intersection_id,
                &proposal.source_id,
                error,
                now_ms,
            );
        }
        if !self.liveness.is_enabled(&proposal.source_id) {
            let error = SubmitError::SourceDisabled {
                source_id: proposal.source_id.clone(),
            };
            return self.reject_proposal(
                &proposal.intersection_id,
                &proposal.source_id,
                error,
                now_ms,
            );
        }
        if !self.sequence_gate.is_fresh(&proposal.source_id, proposal.seq) {
            let error = SubmitError::StaleSequence {
                source_id: proposal.source_id.clone(),
                seq: proposal.seq,
                last_accepted: self
                    .sequence_gate
                    .last_accepted(&proposal.source_id)
                    .unwrap_or(0),
            };
            return self.reject_proposal(
                &proposal.intersection_id,
                &proposal.source_id,
                error,
                now_ms,
            );
        }
        self.sequence_gate.accept(&proposal.source_id, proposal.seq);

        while self.pending.len() >= self.config.tick.max_pending_submissions {
            let Some(dropped) = self.pending.pop_front() else {
                break;
            };
            self.stats.submissions_dropped = self.stats.submissions_dropped.saturating_add(1);
            self.push_event(
                ControlEvent::new(now_ms, COMPONENT, "submission_dropped", EventOutcome::Warn)
                    .with_intersection(&dropped.intersection_id)
                    .with_source(&dropped.source_id)
                    .with_detail(format!(
                        "buffer full; dropped oldest buffered proposal seq {}",
                        dropped.seq
                    )),
            );
        }
        self.pending.push_back(proposal);
        self.stats.proposals_submitted = self.stats.proposals_submitted.saturating_add(1);
        Ok(())
    }

    /// Records a heartbeat from a command source.
    pub fn heartbeat(&mut self, source_id: &SourceId, now_ms: u64) {
        self.stats.heartbeats_recorded = self.stats.heartbeats_recorded.saturating_add(1);
        if let Some(transition) = self.liveness.record_heartbeat(source_id, now_ms) {
            let event = Self::liveness_event(&transition);
            self.push_event(event);
        }
    }

    /// Administrative kill switch for one source. Returns whether the flag
    /// changed.
    pub fn set_source_enabled(
        &mut self,
        source_id: &SourceId,
        enabled: bool,
        now_ms: u64,
    ) -> bool {
        let changed = self.liveness.set_enabled(source_id, enabled, now_ms);
        if changed {
            let event = if enabled {
                "source_enabled"
            } else {
                "source_disabled"
            };
            let outcome = if enabled {
                EventOutcome::Info
            } else {
                EventOutcome::Warn
            };
            self.push_event(
                ControlEvent::new(now_ms, COMPONENT, event, outcome).with_source(source_id),
            );
        }
        changed
    }

    /// Operator hold for one intersection. While held it runs its fallback
    /// plan and buffered proposals for it are discarded at the pass; the
    /// owning source is untouched. Returns whether the flag changed;
    /// unconfigured intersections are refused.
    pub fn set_intersection_hold(
        &mut self,
        intersection_id: &IntersectionId,
        held: bool,
        now_ms: u64,
    ) -> bool {
        if !self.config.intersections.contains_key(intersection_id) {
            self.push_event(
                ControlEvent::new(now_ms, COMPONENT, "hold_refused", EventOutcome::Warn)
                    .with_intersection(intersection_id)
                    .with_detail("hold names an intersection outside the configuration"),
            );
            return false;
        }
        let changed = if held {
            self.held.insert(intersection_id.clone())
        } else {
            self.held.remove(intersection_id)
        };
        if changed {
            let event = if held {
                "intersection_held"
            } else {
                "intersection_released"
            };
            let outcome = if held {
                EventOutcome::Warn
            } else {
                EventOutcome::Info
            };
            self.push_event(
                ControlEvent::new(now_ms, COMPONENT, event, outcome)
                    .with_intersection(intersection_id),
            );
        }
        changed
    }

    pub fn is_intersection_held(&self, intersection_id: &IntersectionId) -> bool {
        self.held.contains(intersection_id)
    }

    // -- feed surface -------------------------------------------------------

    pub fn subscribe(&mut self, subscriber_id: &SubscriberId, now_ms: u64) -> bool {
        let added = self.feed.subscribe(subscriber_id);
        if added {
            self.push_event(
                ControlEvent::new(now_ms, COMPONENT, "subscriber_added", EventOutcome::Info)
                    .with_detail(subscriber_id.to_string()),
            );
        }
        added
    }

    pub fn unsubscribe(&mut self, subscriber_id: &SubscriberId, now_ms: u64) -> bool {
        let removed = self.feed.unsubscribe(subscriber_id);
        if removed {
            self.push_event(
                ControlEvent::new(now_ms, COMPONENT, "subscriber_removed", EventOutcome::Info)
                    .with_detail(subscriber_id.to_string()),
            );
        }
        removed
    }

    pub fn drain_feed(&mut self, subscriber_id: &SubscriberId) -> Option<Vec<TickRecord>> {
        self.feed.drain(subscriber_id)
    }

    pub fn feed_dropped_total(&self, subscriber_id: &SubscriberId) -> u64 {
        self.feed.dropped_total(subscriber_id)
    }

    // -- governance surface -------------------------------------------------

    pub fn export_autonomy_state(&self) -> BTreeMap<IntersectionId, AutonomyRecord> {
        self.governor.state_snapshot()
    }

    /// Imports governance records wholesale, for operator-driven migration
    /// between planes. The imported state is persisted on the next tick.
    pub fn import_autonomy_state(
        &mut self,
        records: BTreeMap<IntersectionId, AutonomyRecord>,
        now_ms: u64,
    ) -> RestoreStats {
        let stats = self.governor.restore(records);
        self.push_event(
            ControlEvent::new(
                now_ms,
                crate::autonomy::COMPONENT,
                "governance_imported",
                EventOutcome::Info,
            )
            .with_detail(format!(
                "{} records imported, {} replaced",
                stats.applied, stats.overwritten
            )),
        );
        stats
    }

    // -- tick ---------------------------------------------------------------

    /// One arbitration pass. Consumes the proposal buffer atomically,
    /// selects one command per configured intersection, feeds outcomes to
    /// the governor, persists governance state, and publishes the record.
    pub fn tick(&mut self, now_ms: u64) -> TickRecord {
        self.stats.ticks = self.stats.ticks.saturating_add(1);
        let mut events: Vec<ControlEvent> = Vec::new();

        let liveness_transitions = self.liveness.observe_tick(now_ms);
        let mut newly_unresponsive: BTreeSet<SourceId> = BTreeSet::new();
        for transition in &liveness_transitions {
            events.push(Self::liveness_event(transition));
            if transition.to == LivenessState::Unresponsive {
                newly_unresponsive.insert(transition.source_id.clone());
            }
        }

        // One warn per quiet episode; an accepted snapshot rearms the latch.
        if let Some(ingested_at) = self.last_ingest_at_ms {
            let age_ms = now_ms.saturating_sub(ingested_at);
            if !self.snapshot_stale_flagged && age_ms > self.config.tick.snapshot_stale_after_ms {
                self.snapshot_stale_flagged = true;
                events.push(
                    ControlEvent::new(now_ms, COMPONENT, "snapshot_stale", EventOutcome::Warn)
                        .with_detail(format!(
                            "no snapshot accepted for {age_ms}ms; arbitrating on aging state"
                        )),
                );
            }
        }

        // Everything buffered up to this point belongs to this tick; later
        // submissions wait for the next one.
        let pending = mem::take(&mut self.pending);
        let mut winners: BTreeMap<IntersectionId, CommandProposal> = BTreeMap::new();
        for proposal in pending {
            let key = proposal.intersection_id.clone();
            if let Some(previous) = winners.insert(key, proposal) {
                self.stats.proposals_superseded =
                    self.stats.proposals_superseded.saturating_add(1);
                events.push(
                    ControlEvent::new(
                        now_ms,
                        COMPONENT,
                        "proposal_superseded",
                        EventOutcome::Info,
                    )
                    .with_intersection(&previous.intersection_id)
                    .with_source(&previous.source_id)
                    .with_detail(format!(
                        "seq {} superseded by a newer buffered proposal",
                        previous.seq
                    )),
                );
            }
        }

        let mut budget = EvaluationBudget::new(self.config.tick.tick_budget_ms);
        let mut commands: Vec<AppliedCommand> = Vec::with_capacity(self.config.intersections.len());
        let mut outcomes: Vec<TickOutcome> = Vec::with_capacity(self.config.intersections.len());

        for (intersection_id, spec) in &self.config.intersections {
            let owner = &spec.owner;
            let level = self.governor.level_for(intersection_id);
            let fallback_plan = self.fallback.plan_for(intersection_id);
            let proposal = winners.remove(intersection_id);

            if self.held.contains(intersection_id) {
                if let Some(discarded) = proposal {
                    self.stats.proposals_discarded =
                        self.stats.proposals_discarded.saturating_add(1);
                    events.push(
                        ControlEvent::new(
                            now_ms,
                            COMPONENT,
                            "proposal_discarded",
                            EventOutcome::Warn,
                        )
                        .with_intersection(intersection_id)
                        .with_source(&discarded.source_id)
                        .with_detail(format!(
                            "seq {} discarded; the intersection is held",
                            discarded.seq
                        )),
                    );
                }
                commands.push(AppliedCommand {
                    intersection_id: intersection_id.clone(),
                    plan: fallback_plan.clone(),
                    applied_via: AppliedVia::Fallback,
                    reason_code: Some(REASON_OPERATOR_HOLD.to_string()),
                    source_id: None,
                    proposal_seq: None,
                    confidence_millionths: None,
                    autonomy_level: level,
                });
                let mut outcome = TickOutcome::idle(intersection_id.clone());
                outcome.source_unresponsive = newly_unresponsive.contains(owner);
                outcomes.push(outcome);
                continue;
            }

            if !self.liveness.is_available(owner) {
                if let Some(discarded) = proposal {
                    self.stats.proposals_discarded =
                        self.stats.proposals_discarded.saturating_add(1);
                    events.push(
                        ControlEvent::new(
                            now_ms,
                            COMPONENT,
                            "proposal_discarded",
                            EventOutcome::Warn,
                        )
                        .with_intersection(intersection_id)
                        .with_source(&discarded.source_id)
                        .with_detail(format!(
                            "seq {} discarded; owning source is unavailable",
                            discarded.seq
                        )),
                    );
                }
                let reason = if self.liveness.is_enabled(owner) {
                    REASON_SOURCE_UNRESPONSIVE
                } else {
                    REASON_SOURCE_DISABLED
                };
                commands.push(AppliedCommand {
                    intersection_id: intersection_id.clone(),
                    plan: fallback_plan.clone(),
                    applied_via: AppliedVia::Fallback,
                    reason_code: Some(reason.to_string()),
                    source_id: None,
                    proposal_seq: None,
                    confidence_millionths: None,
                    autonomy_level: level,
                });
                let mut outcome = TickOutcome::idle(intersection_id.clone());
                outcome.source_unresponsive = newly_unresponsive.contains(owner);
                outcomes.push(outcome);
                continue;
            }

            let Some(proposal) = proposal else {
                commands.push(AppliedCommand {
                    intersection_id: intersection_id.clone(),
                    plan: fallback_plan.clone(),
                    applied_via: AppliedVia::Fallback,
                    reason_code: Some(REASON_NO_PROPOSAL.to_string()),
                    source_id: None,
                    proposal_seq: None,
                    confidence_millionths: None,
                    autonomy_level: level,
                });
                outcomes.push(TickOutcome::idle(intersection_id.clone()));
                continue;
            };

            let decision = self.guardian.evaluate(
                &proposal,
                self.canonical.get(intersection_id),
                spec,
                fallback_plan,
                &mut budget,
            );
            match decision.verdict {
                VetoVerdict::Override {
                    substitute,
                    reason_code,
                    rule_id,
                    detail,
                } => {
                    let faulted = reason_code == REASON_BUDGET_EXHAUSTED
                        || reason_code == REASON_EVALUATION_FAULT;
                    events.push(
                        ControlEvent::new(
                            now_ms,
                            crate::guardian::COMPONENT,
                            "proposal_overridden",
                            EventOutcome::Warn,
                        )
                        .with_intersection(intersection_id)
                        .with_source(&proposal.source_id)
                        .with_detail(match (&rule_id, &detail) {
                            (Some(rule), Some(detail)) => {
                                format!("{reason_code} by rule {rule}: {detail}")
                            }
                            _ => reason_code.clone(),
                        }),
                    );
                    outcomes.push(TickOutcome {
                        intersection_id: intersection_id.clone(),
                        proposal_seen: true,
                        proposal_applied: false,
                        confidence_millionths: proposal.confidence_millionths,
                        vetoed: !faulted,
                        faulted,
                        source_unresponsive: false,
                        performance_millionths: None,
                    });
                    commands.push(AppliedCommand {
                        intersection_id: intersection_id.clone(),
                        plan: substitute,
                        applied_via: AppliedVia::Override,
                        reason_code: Some(reason_code),
                        source_id: Some(proposal.source_id),
                        proposal_seq: Some(proposal.seq),
                        confidence_millionths: Some(proposal.confidence_millionths),
                        autonomy_level: level,
                    });
                }
                VetoVerdict::Accept => {
                    let withheld_reason = if level == AutonomyLevel::Observer {
                        Some(REASON_OBSERVER_MODE)
                    } else if !self.governor.authorizes(intersection_id, now_ms) {
                        Some(REASON_SUPERVISED_OUT_OF_WINDOW)
                    } else {
                        None
                    };
                    match withheld_reason {
                        Some(reason) => {
                            outcomes.push(TickOutcome {
                                intersection_id: intersection_id.clone(),
                                proposal_seen: true,
                                proposal_applied: false,
                                confidence_millionths: proposal.confidence_millionths,
                                vetoed: false,
                                faulted: false,
                                source_unresponsive: false,
                                performance_millionths: None,
                            });
                            commands.push(AppliedCommand {
                                intersection_id: intersection_id.clone(),
                                plan: fallback_plan.clone(),
                                applied_via: AppliedVia::ObserverFallback,
                                reason_code: Some(reason.to_string()),
                                source_id: Some(proposal.source_id),
                                proposal_seq: Some(proposal.seq),
                                confidence_millionths: Some(proposal.confidence_millionths),
                                autonomy_level: level,
                            });
                        }
                        None => {
                            let performance = performance_vs_baseline(
                                spec,
                                self.canonical.get(intersection_id),
                            );
                            outcomes.push(TickOutcome {
                                intersection_id: intersection_id.clone(),
                                proposal_seen: true,
                                proposal_applied: true,
                                confidence_millionths: proposal.confidence_millionths,
                                vetoed: false,
                                faulted: false,
                                source_unresponsive: false,
                                performance_millionths: performance,
                            });
                            commands.push(AppliedCommand {
                                intersection_id: intersection_id.clone(),
                                plan: proposal.plan,
                                applied_via: AppliedVia::Source,
                                reason_code: None,
                                source_id: Some(proposal.source_id),
                                proposal_seq: Some(proposal.seq),
                                confidence_millionths: Some(proposal.confidence_millionths),
                                autonomy_level: level,
                            });
                        }
                    }
                }
            }
        }

        let mut autonomy_transitions = self.governor.observe_tick(&outcomes, now_ms);
        for transition in &autonomy_transitions {
            events.push(Self::autonomy_event(transition));
        }

        self.persist_governance(now_ms, &mut autonomy_transitions, &mut events);

        for command in &commands {
            self.stats.commands_applied = self.stats.commands_applied.saturating_add(1);
            match command.applied_via {
                AppliedVia::Source => {
                    self.stats.source_applied = self.stats.source_applied.saturating_add(1);
                }
                AppliedVia::Override => {
                    self.stats.overrides = self.stats.overrides.saturating_add(1);
                }
                AppliedVia::Fallback => {
                    self.stats.fallbacks = self.stats.fallbacks.saturating_add(1);
                }
                AppliedVia::ObserverFallback => {
                    self.stats.observer_fallbacks =
                        self.stats.observer_fallbacks.saturating_add(1);
                }
            }
        }

        let snapshot = NetworkSnapshot {
            tick_ms: now_ms,
            intersections: self.canonical.clone(),
        };
        let record = TickRecord::new(
            now_ms,
            snapshot,
            commands,
            autonomy_transitions,
            liveness_transitions,
        );

        for drop in self.feed.publish(&record) {
            self.stats.feed_records_dropped = self.stats.feed_records_dropped.saturating_add(1);
            events.push(
                ControlEvent::new(now_ms, COMPONENT, "feed_record_dropped", EventOutcome::Warn)
                    .with_detail(format!(
                        "subscriber {}: record for tick {} evicted",
                        drop.subscriber_id, drop.dropped_tick_ms
                    )),
            );
        }

        for event in events {
            self.push_event(event);
        }
        record
    }

    /// Hands out and clears the buffered structured events.
    pub fn drain_events(&mut self) -> Vec<ControlEvent> {
        self.events.drain(..).collect()
    }

    // -- internals ----------------------------------------------------------

    fn persist_governance(
        &mut self,
        now_ms: u64,
        transitions: &mut Vec<AutonomyTransition>,
        events: &mut Vec<ControlEvent>,
    ) {
        let state = self.governor.state_snapshot();
        if self.last_persisted.as_ref() == Some(&state) {
            return;
        }
        match self.store.save(&state) {
            Ok(()) => {
                if self.consecutive_store_failures > 0 {
                    events.push(ControlEvent::new(
                        now_ms,
                        crate::autonomy::COMPONENT,
                        "governance_store_recovered",
                        EventOutcome::Info,
                    ));
                }
                self.consecutive_store_failures = 0;
                self.store_demotion_fired = false;
                self.last_persisted = Some(state);
            }
            Err(err) => {
                self.stats.store_failures = self.stats.store_failures.saturating_add(1);
                self.consecutive_store_failures =
                    self.consecutive_store_failures.saturating_add(1);
                events.push(
                    ControlEvent::new(
                        now_ms,
                        crate::autonomy::COMPONENT,
                        "governance_store_write_failed",
                        EventOutcome::Failure,
                    )
                    .with_detail(err.to_string())
                    .with_error_code(err.error_code()),
                );
                if self.consecutive_store_failures >= STORE_FAILURES_BEFORE_DEMOTION
                    && !self.store_demotion_fired
                {
                    self.store_demotion_fired = true;
                    let demotions = self
                        .governor
                        .demote_all_above_observer(now_ms, "store_degraded");
                    for transition in &demotions {
                        events.push(Self::autonomy_event(transition));
                    }
                    transitions.extend(demotions);
                }
            }
        }
    }

    fn liveness_event(transition: &LivenessTransition) -> ControlEvent {
        let outcome = if transition.to == LivenessState::Alive {
            EventOutcome::Info
        } else {
            EventOutcome::Warn
        };
        ControlEvent::new(
            transition.at_ms,
            crate::liveness::COMPONENT,
            "liveness_transition",
            outcome,
        )
        .with_source(&transition.source_id)
        .with_detail(format!(
            "{} -> {} ({})",
            transition.from.as_str(),
            transition.to.as_str(),
            transition.reason
        ))
    }

    fn autonomy_event(transition: &AutonomyTransition) -> ControlEvent {
        let outcome = if transition.to > transition.from {
            EventOutcome::Info
        } else {
            EventOutcome::Warn
        };
        ControlEvent::new(
            transition.at_ms,
            crate::autonomy::COMPONENT,
            "autonomy_transition",
            outcome,
        )
        .with_intersection(&transition.intersection_id)
        .with_detail(format!(
            "{} -> {} ({})",
            transition.from.as_str(),
            transition.to.as_str(),
            transition.reason
        ))
    }

    fn reject_snapshot(&mut self, error: IngestError, now_ms: u64) -> Result<(), IngestError> {
        self.stats.snapshots_rejected = self.stats.snapshots_rejected.saturating_add(1);
        self.push_event(
            ControlEvent::new(now_ms, COMPONENT, "snapshot_rejected", EventOutcome::Warn)
                .with_detail(error.message())
                .with_error_code(error.error_code()),
        );
        Err(error)
    }

    fn reject_proposal(
        &mut self,
        intersection_id: &IntersectionId,
        source_id: &SourceId,
        error: SubmitError,
        now_ms: u64,
    ) -> Result<(), SubmitError> {
        self.stats.proposals_rejected = self.stats.proposals_rejected.saturating_add(1);
        self.push_event(
            ControlEvent::new(now_ms, COMPONENT, "proposal_rejected", EventOutcome::Warn)
                .with_intersection(intersection_id)
                .with_source(source_id)
                .with_detail(error.message())
                .with_error_code(error.error_code()),
        );
        Err(error)
    }

    fn push_event(&mut self, mut event: ControlEvent) {
        self.next_event_seq = self.next_event_seq.saturating_add(1);
        event.seq = self.next_event_seq;
        self.events.push_back(event);
        while self.events.len() > self.config.tick.max_buffered_events {
            self.events.pop_front();
            self.stats.events_dropped = self.stats.events_dropped.saturating_add(1);
        }
    }
}

/// Observed-vs-baseline performance in millionths. Above `1_000_000` the
/// adaptive control is beating the configured fixed-time baseline; queues
/// shorter than baseline score higher.
fn performance_vs_baseline(
    spec: &IntersectionSpec,
    state: Option<&IntersectionState>,
) -> Option<i64> {
    let baseline = spec.baseline_queue_total?;
    let observed = state?.total_queue().max(1);
    let ratio = (i128::from(baseline) * i128::from(MILLION)) / i128::from(observed);
    Some(ratio.min(i128::from(i64::MAX)) as i64)
}
