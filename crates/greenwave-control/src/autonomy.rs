//! Staged autonomy: per-intersection authority levels.
//!
//! The governor never sees a plan. It consumes arbitration outcomes
//! (whether a proposal was observed, applied, or vetoed, and how observed
//! performance compared to the fixed-time baseline) and moves each
//! intersection through `Observer -> Supervised -> Autonomous` one step at a
//! time. Promotion demands an unbroken streak of qualifying ticks; any veto
//! or unresponsive event demotes exactly one level and zeroes the streak.
//! Levels are owned here and persisted by the caller through
//! [`state_snapshot`](AutonomyGovernor::state_snapshot) and
//! [`restore`](AutonomyGovernor::restore).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::IntersectionId;
use crate::proposal::MILLION;

pub(crate) const COMPONENT: &str = "autonomy_governor";

pub const DEFAULT_OBSERVER_PROMOTION_WINDOW: u32 = 50;
pub const DEFAULT_SUPERVISED_PROMOTION_WINDOW: u32 = 200;
pub const DEFAULT_CONFIDENCE_FLOOR_MILLIONTHS: i64 = 900_000;
pub const DEFAULT_PERFORMANCE_MARGIN_MILLIONTHS: i64 = 50_000;
/// Off-peak 22:00 -> 06:00.
pub const DEFAULT_OFF_PEAK_START_MINUTE: u16 = 1_320;
pub const DEFAULT_OFF_PEAK_END_MINUTE: u16 = 360;

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// How much authority the command source holds over one intersection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Proposals are evaluated hypothetically, never applied.
    Observer,
    /// Proposals are applied only inside the off-peak window.
    Supervised,
    /// Proposals are applied at all times, subject only to the safety filter.
    Autonomous,
}

impl AutonomyLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Supervised => "supervised",
            Self::Autonomous => "autonomous",
        }
    }

    pub const fn all() -> [AutonomyLevel; 3] {
        [Self::Observer, Self::Supervised, Self::Autonomous]
    }

    /// One step up, saturating at `Autonomous`.
    pub const fn step_up(self) -> AutonomyLevel {
        match self {
            Self::Observer => Self::Supervised,
            Self::Supervised | Self::Autonomous => Self::Autonomous,
        }
    }

    /// One step down, saturating at `Observer`. Levels are never skipped.
    pub const fn step_down(self) -> AutonomyLevel {
        match self {
            Self::Observer | Self::Supervised => Self::Observer,
            Self::Autonomous => Self::Supervised,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A daily time window in minutes of day, UTC. `start == end` matches
/// nothing; `start > end` wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffPeakWindow {
    pub start_minute: u16,
    pub end_minute: u16,
}

impl OffPeakWindow {
    pub fn contains(&self, minute: u16) -> bool {
        if self.start_minute <= self.end_minute {
            minute >= self.start_minute && minute < self.end_minute
        } else {
            minute >= self.start_minute || minute < self.end_minute
        }
    }
}

impl Default for OffPeakWindow {
    fn default() -> Self {
        Self {
            start_minute: DEFAULT_OFF_PEAK_START_MINUTE,
            end_minute: DEFAULT_OFF_PEAK_END_MINUTE,
        }
    }
}

/// Minute of day for a wall-clock timestamp in ms.
pub fn minute_of_day(now_ms: u64) -> u16 {
    ((now_ms / 60_000) % 1_440) as u16
}

/// Opt-in demotion on sustained low confidence without an explicit veto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowConfidenceDemotion {
    pub floor_millionths: i64,
    pub run_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Qualifying streak for `Observer -> Supervised`.
    pub observer_promotion_window: u32,
    /// Qualifying streak for `Supervised -> Autonomous`.
    pub supervised_promotion_window: u32,
    /// Minimum confidence for a tick to qualify.
    pub confidence_floor_millionths: i64,
    /// Performance must beat baseline by this margin for
    /// `Supervised -> Autonomous` ticks to qualify.
    pub performance_margin_millionths: i64,
    pub off_peak: OffPeakWindow,
    pub low_confidence_demotion: Option<LowConfidenceDemotion>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            observer_promotion_window: DEFAULT_OBSERVER_PROMOTION_WINDOW,
            supervised_promotion_window: DEFAULT_SUPERVISED_PROMOTION_WINDOW,
            confidence_floor_millionths: DEFAULT_CONFIDENCE_FLOOR_MILLIONTHS,
            performance_margin_millionths: DEFAULT_PERFORMANCE_MARGIN_MILLIONTHS,
            off_peak: OffPeakWindow::default(),
            low_confidence_demotion: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records, outcomes, transitions
// ---------------------------------------------------------------------------

/// Per-intersection governance state. This is the persisted schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomyRecord {
    pub level: AutonomyLevel,
    /// Consecutive qualifying ticks toward the next promotion.
    pub qualifying_streak: u32,
    /// Consecutive sub-floor-confidence ticks (only tracked when the
    /// low-confidence policy is enabled).
    pub low_confidence_run: u32,
    /// Vetoes and unresponsive events observed at the current level.
    pub incidents_at_level: u64,
    pub last_transition_ms: u64,
}

impl AutonomyRecord {
    fn new(now_ms: u64) -> Self {
        Self {
            level: AutonomyLevel::Observer,
            qualifying_streak: 0,
            low_confidence_run: 0,
            incidents_at_level: 0,
            last_transition_ms: now_ms,
        }
    }
}

/// What arbitration observed for one intersection in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub intersection_id: IntersectionId,
    /// A fresh proposal existed for the intersection this tick.
    pub proposal_seen: bool,
    /// The proposal was actually applied (`source` attribution).
    pub proposal_applied: bool,
    /// Meaningful only when `proposal_seen`.
    pub confidence_millionths: i64,
    /// The proposal was vetoed by a safety rule.
    pub vetoed: bool,
    /// Evaluation faulted or ran out of budget; not an incident, but the
    /// tick cannot qualify.
    pub faulted: bool,
    /// The owning source crossed into `Unresponsive` this tick.
    pub source_unresponsive: bool,
    /// Observed-vs-baseline performance ratio in millionths, when a
    /// baseline is configured.
    pub performance_millionths: Option<i64>,
}

impl TickOutcome {
    /// A tick in which nothing arrived for the intersection.
    pub fn idle(intersection_id: IntersectionId) -> Self {
        Self {
            intersection_id,
            proposal_seen: false,
            proposal_applied: false,
            confidence_millionths: 0,
            vetoed: false,
            faulted: false,
            source_unresponsive: false,
            performance_millionths: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutonomyTransition {
    pub intersection_id: IntersectionId,
    pub from: AutonomyLevel,
    pub to: AutonomyLevel,
    pub at_ms: u64,
    pub reason: &'static str,
}

/// Result of importing governance state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    pub applied: usize,
    pub overwritten: usize,
}

// ---------------------------------------------------------------------------
// AutonomyGovernor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AutonomyGovernor {
    config: GovernorConfig,
    records: BTreeMap<IntersectionId, AutonomyRecord>,
}

fn demote(
    record: &mut AutonomyRecord,
    intersection_id: &IntersectionId,
    now_ms: u64,
    reason: &'static str,
) -> AutonomyTransition {
    let from = record.level;
    record.level = from.step_down();
    record.qualifying_streak = 0;
    record.low_confidence_run = 0;
    record.incidents_at_level = 0;
    record.last_transition_ms = now_ms;
    AutonomyTransition {
        intersection_id: intersection_id.clone(),
        from,
        to: record.level,
        at_ms: now_ms,
        reason,
    }
}

impl AutonomyGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
        }
    }

    /// Registers an intersection at `Observer` if unknown.
    pub fn register(&mut self, intersection_id: &IntersectionId, now_ms: u64) {
        self.records
            .entry(intersection_id.clone())
            .or_insert_with(|| AutonomyRecord::new(now_ms));
    }

    /// Unknown intersections report `Observer`.
    pub fn level_for(&self, intersection_id: &IntersectionId) -> AutonomyLevel {
        self.records
            .get(intersection_id)
            .map_or(AutonomyLevel::Observer, |r| r.level)
    }

    /// Whether the current level authorizes applying a proposal right now.
    pub fn authorizes(&self, intersection_id: &IntersectionId, now_ms: u64) -> bool {
        match self.level_for(intersection_id) {
            AutonomyLevel::Observer => false,
            AutonomyLevel::Supervised => self.config.off_peak.contains(minute_of_day(now_ms)),
            AutonomyLevel::Autonomous => true,
        }
    }

    pub fn record(&self, intersection_id: &IntersectionId) -> Option<&AutonomyRecord> {
        self.records.get(intersection_id)
    }

    /// Feeds one tick of arbitration outcomes through the state machine.
    pub fn observe_tick(
        &mut self,
        outcomes: &[TickOutcome],
        now_ms: u64,
    ) -> Vec<AutonomyTransition> {
        let mut transitions = Vec::new();
        for outcome in outcomes {
            let record = self
                .records
                .entry(outcome.intersection_id.clone())
                .or_insert_with(|| AutonomyRecord::new(now_ms));

            if outcome.vetoed || outcome.source_unresponsive {
                record.incidents_at_level = record.incidents_at_level.saturating_add(1);
                record.qualifying_streak = 0;
                record.low_confidence_run = 0;
                if record.level != AutonomyLevel::Observer {
                    let reason = if outcome.vetoed {
                        "safety_veto"
                    } else {
                        "source_unresponsive"
                    };
                    transitions.push(demote(
                        record,
                        &outcome.intersection_id,
                        now_ms,
                        reason,
                    ));
                }
                continue;
            }

            let confident = outcome.confidence_millionths >= self.config.confidence_floor_millionths;
            let performance_cleared = outcome.performance_millionths.is_some_and(|p| {
                p >= MILLION.saturating_add(self.config.performance_margin_millionths)
            });
            let qualifying = match record.level {
                AutonomyLevel::Observer => {
                    outcome.proposal_seen && !outcome.faulted && confident
                }
                AutonomyLevel::Supervised => {
                    outcome.proposal_applied && !outcome.faulted && confident && performance_cleared
                }
                AutonomyLevel::Autonomous => false,
            };

            if qualifying {
                record.qualifying_streak = record.qualifying_streak.saturating_add(1);
                record.low_confidence_run = 0;
                let window = match record.level {
                    AutonomyLevel::Observer => self.config.observer_promotion_window,
                    AutonomyLevel::Supervised => self.config.supervised_promotion_window,
                    AutonomyLevel::Autonomous => u32::MAX,
                };
                if record.qualifying_streak >= window {
                    let from = record.level;
                    record.level = from.step_up();
                    record.qualifying_streak = 0;
                    record.incidents_at_level = 0;
                    record.last_transition_ms = now_ms;
                    transitions.push(AutonomyTransition {
                        intersection_id: outcome.intersection_id.clone(),
                        from,
                        to: record.level,
                        at_ms: now_ms,
                        reason: "promotion_window",
                    });
                }
                continue;
            }

            record.qualifying_streak = 0;
            let low_confidence_hit = self.config.low_confidence_demotion.as_ref().filter(|p| {
                outcome.proposal_seen
                    && !outcome.faulted
                    && outcome.confidence_millionths < p.floor_millionths
                    && record.level != AutonomyLevel::Observer
            });
            match low_confidence_hit {
                Some(policy) => {
                    record.low_confidence_run = record.low_confidence_run.saturating_add(1);
                    if record.low_confidence_run >= policy.run_length {
                        transitions.push(demote(
                            record,
                            &outcome.intersection_id,
                            now_ms,
                            "low_confidence",
                        ));
                    }
                }
                None => record.low_confidence_run = 0,
            }
        }
        transitions
    }

    /// Conservative demotion of every intersection above `Observer`; used
    /// when persistence fails repeatedly and in-memory state is all that is
    /// left.
    pub fn demote_all_above_observer(
        &mut self,
        now_ms: u64,
        reason: &'static str,
    ) -> Vec<AutonomyTransition> {
        let mut transitions = Vec::new();
        for (intersection_id, record) in &mut self.records {
            if record.level != AutonomyLevel::Observer {
                transitions.push(demote(record, intersection_id, now_ms, reason));
            }
        }
        transitions
    }

    /// Value copy of all governance records, for persistence and export.
    pub fn state_snapshot(&self) -> BTreeMap<IntersectionId, AutonomyRecord> {
        self.records.clone()
    }

    /// Imports governance records wholesale, replacing any that collide.
    pub fn restore(
        &mut self,
        records: BTreeMap<IntersectionId, AutonomyRecord>,
    ) -> RestoreStats {
        let mut stats = RestoreStats::default();
        for (intersection_id, record) in records {
            if self.records.insert(intersection_id, record).is_some() {
                stats.overwritten += 1;
            }
            stats.applied += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GovernorConfig {
        GovernorConfig {
            observer_promotion_window: 3,
            supervised_promotion_window: 4,
            ..GovernorConfig::default()
        }
    }

    fn x() -> IntersectionId {
        IntersectionId::from("x-main")
    }

    fn qualifying_observer_outcome() -> TickOutcome {
        TickOutcome {
            proposal_seen: true,
            confidence_millionths: 950_000,
            ..TickOutcome::idle(x())
        }
    }

    fn qualifying_supervised_outcome() -> TickOutcome {
        TickOutcome {
            proposal_seen: true,
            proposal_applied: true,
            confidence_millionths: 950_000,
            performance_millionths: Some(1_100_000),
            ..TickOutcome::idle(x())
        }
    }

    fn governor_at(level: AutonomyLevel) -> AutonomyGovernor {
        let mut governor = AutonomyGovernor::new(test_config());
        let mut records = BTreeMap::new();
        records.insert(
            x(),
            AutonomyRecord {
                level,
                qualifying_streak: 0,
                low_confidence_run: 0,
                incidents_at_level: 0,
                last_transition_ms: 0,
            },
        );
        governor.restore(records);
        governor
    }

    #[test]
    fn promotion_fires_exactly_at_the_window() {
        let mut governor = AutonomyGovernor::new(test_config());
        for tick in 1..=2 {
            let transitions =
                governor.observe_tick(&[qualifying_observer_outcome()], tick * 1_000);
            assert!(transitions.is_empty(), "tick {tick} must not promote yet");
            assert_eq!(governor.level_for(&x()), AutonomyLevel::Observer);
        }
        let transitions = governor.observe_tick(&[qualifying_observer_outcome()], 3_000);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, AutonomyLevel::Observer);
        assert_eq!(transitions[0].to, AutonomyLevel::Supervised);
        assert_eq!(transitions[0].reason, "promotion_window");
        assert_eq!(governor.record(&x()).unwrap().qualifying_streak, 0);
    }

    #[test]
    fn a_gap_in_the_streak_starts_the_window_over() {
        let mut governor = AutonomyGovernor::new(test_config());
        governor.observe_tick(&[qualifying_observer_outcome()], 1_000);
        governor.observe_tick(&[qualifying_observer_outcome()], 2_000);
        // No proposal this tick: not an incident, but the streak dies.
        governor.observe_tick(&[TickOutcome::idle(x())], 3_000);
        assert_eq!(governor.record(&x()).unwrap().qualifying_streak, 0);

        governor.observe_tick(&[qualifying_observer_outcome()], 4_000);
        governor.observe_tick(&[qualifying_observer_outcome()], 5_000);
        assert_eq!(governor.level_for(&x()), AutonomyLevel::Observer);
        let transitions = governor.observe_tick(&[qualifying_observer_outcome()], 6_000);
        assert_eq!(transitions.len(), 1);
    }

    #[test]
    fn low_confidence_does_not_qualify() {
        let mut governor = AutonomyGovernor::new(test_config());
        let outcome = TickOutcome {
            confidence_millionths: 600_000,
            ..qualifying_observer_outcome()
        };
        for tick in 1..=5 {
            governor.observe_tick(&[outcome.clone()], tick * 1_000);
        }
        assert_eq!(governor.level_for(&x()), AutonomyLevel::Observer);
    }

    #[test]
    fn veto_demotes_exactly_one_level() {
        let mut governor = governor_at(AutonomyLevel::Autonomous);
        let vetoed = TickOutcome {
            proposal_seen: true,
            vetoed: true,
            ..TickOutcome::idle(x())
        };
        let transitions = governor.observe_tick(&[vetoed.clone()], 1_000);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, AutonomyLevel::Supervised);
        assert_eq!(transitions[0].reason, "safety_veto");

        let transitions = governor.observe_tick(&[vetoed.clone()], 2_000);
        assert_eq!(transitions[0].to, AutonomyLevel::Observer);

        // At the floor there is nothing left to demote.
        let transitions = governor.observe_tick(&[vetoed], 3_000);
        assert!(transitions.is_empty());
        assert_eq!(governor.record(&x()).unwrap().incidents_at_level, 1);
    }

    #[test]
    fn unresponsive_event_demotes_once() {
        let mut governor = governor_at(AutonomyLevel::Autonomous);
        let outage = TickOutcome {
            source_unresponsive: true,
            ..TickOutcome::idle(x())
        };
        let transitions = governor.observe_tick(&[outage], 1_000);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, AutonomyLevel::Supervised);
        assert_eq!(transitions[0].reason, "source_unresponsive");

        // Continued silence without a fresh event is not a new incident.
        let transitions = governor.observe_tick(&[TickOutcome::idle(x())], 2_000);
        assert!(transitions.is_empty());
        assert_eq!(governor.level_for(&x()), AutonomyLevel::Supervised);
    }

    #[test]
    fn supervised_promotion_requires_performance_above_baseline() {
        let mut governor = governor_at(AutonomyLevel::Supervised);

        // Confidence alone is not enough without a performance edge.
        let flat = TickOutcome {
            performance_millionths: Some(1_000_000),
            ..qualifying_supervised_outcome()
        };
        for tick in 1..=6 {
            governor.observe_tick(&[flat.clone()], tick * 1_000);
        }
        assert_eq!(governor.level_for(&x()), AutonomyLevel::Supervised);

        for tick in 7..=9 {
            let transitions =
                governor.observe_tick(&[qualifying_supervised_outcome()], tick * 1_000);
            assert!(transitions.is_empty());
        }
        let transitions = governor.observe_tick(&[qualifying_supervised_outcome()], 10_000);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, AutonomyLevel::Autonomous);
    }

    #[test]
    fn missing_baseline_blocks_supervised_promotion() {
        let mut governor = governor_at(AutonomyLevel::Supervised);
        let no_baseline = TickOutcome {
            performance_millionths: None,
            ..qualifying_supervised_outcome()
        };
        for tick in 1..=8 {
            governor.observe_tick(&[no_baseline.clone()], tick * 1_000);
        }
        assert_eq!(governor.level_for(&x()), AutonomyLevel::Supervised);
    }

    #[test]
    fn authorizes_follows_level_and_window() {
        // 00:00 is inside the default 22:00 -> 06:00 window; 12:00 is not.
        let in_window_ms = 0;
        let out_of_window_ms = 12 * 60 * 60 * 1_000;

        let governor = governor_at(AutonomyLevel::Supervised);
        assert!(governor.authorizes(&x(), in_window_ms));
        assert!(!governor.authorizes(&x(), out_of_window_ms));

        let governor = governor_at(AutonomyLevel::Autonomous);
        assert!(governor.authorizes(&x(), out_of_window_ms));

        let governor = governor_at(AutonomyLevel::Observer);
        assert!(!governor.authorizes(&x(), in_window_ms));
    }

    #[test]
    fn off_peak_window_wraps_midnight() {
        let window = OffPeakWindow::default();
        assert!(window.contains(1_330));
        assert!(window.contains(100));
        assert!(!window.contains(720));

        let empty = OffPeakWindow {
            start_minute: 300,
            end_minute: 300,
        };
        assert!(!empty.contains(300));
        assert!(!empty.contains(0));
    }

    #[test]
    fn minute_of_day_wraps_days() {
        assert_eq!(minute_of_day(0), 0);
        assert_eq!(minute_of_day(43_200_000), 720);
        assert_eq!(minute_of_day(86_400_000 + 60_000), 1);
    }

    #[test]
    fn low_confidence_demotion_is_opt_in() {
        let low = TickOutcome {
            proposal_seen: true,
            proposal_applied: true,
            confidence_millionths: 100_000,
            ..TickOutcome::idle(x())
        };

        // Default policy: sustained low confidence never demotes.
        let mut governor = governor_at(AutonomyLevel::Autonomous);
        for tick in 1..=5 {
            assert!(governor.observe_tick(&[low.clone()], tick * 1_000).is_empty());
        }
        assert_eq!(governor.level_for(&x()), AutonomyLevel::Autonomous);

        // Enabled policy: a run of sub-floor ticks demotes one level.
        let mut config = test_config();
        config.low_confidence_demotion = Some(LowConfidenceDemotion {
            floor_millionths: 500_000,
            run_length: 2,
        });
        let mut governor = AutonomyGovernor::new(config);
        let mut records = BTreeMap::new();
        records.insert(
            x(),
            AutonomyRecord {
                level: AutonomyLevel::Autonomous,
                qualifying_streak: 0,
                low_confidence_run: 0,
                incidents_at_level: 0,
                last_transition_ms: 0,
            },
        );
        governor.restore(records);

        assert!(governor.observe_tick(&[low.clone()], 1_000).is_empty());
        let transitions = governor.observe_tick(&[low], 2_000);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, AutonomyLevel::Supervised);
        assert_eq!(transitions[0].reason, "low_confidence");
    }

    #[test]
    fn conservative_demotion_steps_everyone_down_once() {
        let mut governor = AutonomyGovernor::new(test_config());
        let mut records = BTreeMap::new();
        for (id, level) in [
            ("a", AutonomyLevel::Autonomous),
            ("b", AutonomyLevel::Supervised),
            ("c", AutonomyLevel::Observer),
        ] {
            records.insert(
                IntersectionId::from(id),
                AutonomyRecord {
                    level,
                    qualifying_streak: 7,
                    low_confidence_run: 0,
                    incidents_at_level: 0,
                    last_transition_ms: 0,
                },
            );
        }
        governor.restore(records);

        let transitions = governor.demote_all_above_observer(5_000, "store_degraded");
        assert_eq!(transitions.len(), 2);
        assert_eq!(
            governor.level_for(&IntersectionId::from("a")),
            AutonomyLevel::Supervised
        );
        assert_eq!(
            governor.level_for(&IntersectionId::from("b")),
            AutonomyLevel::Observer
        );
        assert_eq!(
            governor.level_for(&IntersectionId::from("c")),
            AutonomyLevel::Observer
        );
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut governor = AutonomyGovernor::new(test_config());
        governor.observe_tick(&[qualifying_observer_outcome()], 1_000);
        let exported = governor.state_snapshot();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported.get(&x()).unwrap().qualifying_streak, 1);

        let mut fresh = AutonomyGovernor::new(test_config());
        fresh.register(&x(), 0);
        let stats = fresh.restore(exported.clone());
        assert_eq!(
            stats,
            RestoreStats {
                applied: 1,
                overwritten: 1
            }
        );
        assert_eq!(fresh.state_snapshot(), exported);
    }
}
