//! Heartbeat liveness for command sources.
//!
//! Pure time-driven state machine, evaluated once per tick against the
//! caller's clock. Key behavior:
//!
//! - misses accrue in whole heartbeat intervals of silence; thresholds move
//!   a source `Alive -> Suspected -> Unresponsive`, possibly both steps in
//!   one evaluation after a long stall;
//! - a heartbeat while `Alive`/`Suspected` resets to `Alive` immediately;
//! - recovery from `Unresponsive` demands a configured streak of on-time
//!   heartbeats, and the first heartbeat after a silence is never on-time,
//!   so a flapping source cannot oscillate between AI and fallback control;
//! - a startup grace period delays the first misses after registration;
//! - a source can be administratively disabled, which freezes escalation
//!   and reports it unavailable without touching its heartbeat bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::SourceId;

pub(crate) const COMPONENT: &str = "liveness_monitor";

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_SUSPECT_AFTER_MISSES: u32 = 1;
pub const DEFAULT_UNRESPONSIVE_AFTER_MISSES: u32 = 3;
pub const DEFAULT_RECOVERY_STREAK: u32 = 3;
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 15_000;
pub const DEFAULT_ON_TIME_GRACE_MS: u64 = 200;

// ---------------------------------------------------------------------------
// States and configuration
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Alive,
    Suspected,
    Unresponsive,
}

impl LivenessState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Suspected => "suspected",
            Self::Unresponsive => "unresponsive",
        }
    }

    pub const fn all() -> [LivenessState; 3] {
        [Self::Alive, Self::Suspected, Self::Unresponsive]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Expected heartbeat cadence.
    pub heartbeat_interval_ms: u64,
    /// Missed intervals before `Alive -> Suspected`.
    pub suspect_after_misses: u32,
    /// Missed intervals before `-> Unresponsive`; must exceed the suspect
    /// threshold.
    pub unresponsive_after_misses: u32,
    /// Consecutive on-time heartbeats required for `Unresponsive -> Alive`.
    pub recovery_streak: u32,
    /// Silence allowed after registration before misses accrue.
    pub startup_grace_ms: u64,
    /// Scheduling jitter tolerated when judging a heartbeat on-time.
    pub on_time_grace_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            suspect_after_misses: DEFAULT_SUSPECT_AFTER_MISSES,
            unresponsive_after_misses: DEFAULT_UNRESPONSIVE_AFTER_MISSES,
            recovery_streak: DEFAULT_RECOVERY_STREAK,
            startup_grace_ms: DEFAULT_STARTUP_GRACE_MS,
            on_time_grace_ms: DEFAULT_ON_TIME_GRACE_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Records and transitions
// ---------------------------------------------------------------------------

/// Per-source heartbeat bookkeeping. Owned and mutated only by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub state: LivenessState,
    pub registered_at_ms: u64,
    pub last_heartbeat_ms: Option<u64>,
    pub miss_count: u32,
    pub recovery_streak: u32,
    pub enabled: bool,
}

impl HeartbeatRecord {
    fn new(registered_at_ms: u64) -> Self {
        Self {
            state: LivenessState::Alive,
            registered_at_ms,
            last_heartbeat_ms: None,
            miss_count: 0,
            recovery_streak: 0,
            enabled: true,
        }
    }
}

/// One observed liveness state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessTransition {
    pub source_id: SourceId,
    pub from: LivenessState,
    pub to: LivenessState,
    pub at_ms: u64,
    pub reason: &'static str,
}

// ---------------------------------------------------------------------------
// LivenessMonitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    config: LivenessConfig,
    sources: BTreeMap<SourceId, HeartbeatRecord>,
}

impl LivenessMonitor {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            sources: BTreeMap::new(),
        }
    }

    /// Registers a source if unknown; re-registration is a no-op.
    pub fn register_source(&mut self, source_id: &SourceId, now_ms: u64) {
        self.sources
            .entry(source_id.clone())
            .or_insert_with(|| HeartbeatRecord::new(now_ms));
    }

    /// Records a heartbeat. Unknown sources are registered on first contact.
    pub fn record_heartbeat(
        &mut self,
        source_id: &SourceId,
        now_ms: u64,
    ) -> Option<LivenessTransition> {
        let config = &self.config;
        let record = self
            .sources
            .entry(source_id.clone())
            .or_insert_with(|| HeartbeatRecord::new(now_ms));
        let previous = record.last_heartbeat_ms;
        record.last_heartbeat_ms = Some(now_ms);

        match record.state {
            LivenessState::Alive => {
                record.miss_count = 0;
                None
            }
            LivenessState::Suspected => {
                record.miss_count = 0;
                record.state = LivenessState::Alive;
                Some(LivenessTransition {
                    source_id: source_id.clone(),
                    from: LivenessState::Suspected,
                    to: LivenessState::Alive,
                    at_ms: now_ms,
                    reason: "heartbeat",
                })
            }
            LivenessState::Unresponsive => {
                let on_time = previous.is_some_and(|prev| {
                    now_ms.saturating_sub(prev)
                        <= config.heartbeat_interval_ms + config.on_time_grace_ms
                });
                record.recovery_streak = if on_time {
                    record.recovery_streak.saturating_add(1)
                } else {
                    0
                };
                if record.recovery_streak >= config.recovery_streak {
                    record.state = LivenessState::Alive;
                    record.miss_count = 0;
                    record.recovery_streak = 0;
                    Some(LivenessTransition {
                        source_id: source_id.clone(),
                        from: LivenessState::Unresponsive,
                        to: LivenessState::Alive,
                        at_ms: now_ms,
                        reason: "recovery_streak",
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Evaluates every enabled source against the clock, escalating states
    /// whose miss thresholds were crossed. De-escalation only ever happens
    /// through heartbeats.
    pub fn observe_tick(&mut self, now_ms: u64) -> Vec<LivenessTransition> {
        let config = &self.config;
        let mut transitions = Vec::new();
        for (source_id, record) in &mut self.sources {
            if !record.enabled {
                continue;
            }
            let deadline_base = match record.last_heartbeat_ms {
                Some(at) => at,
                None => record
                    .registered_at_ms
                    .saturating_add(config.startup_grace_ms),
            };
            let misses = if now_ms > deadline_base {
                let elapsed = now_ms - deadline_base;
                u32::try_from(elapsed / config.heartbeat_interval_ms).unwrap_or(u32::MAX)
            } else {
                0
            };
            record.miss_count = misses;

            if record.state == LivenessState::Alive && misses >= config.suspect_after_misses {
                record.state = LivenessState::Suspected;
                transitions.push(LivenessTransition {
                    source_id: source_id.clone(),
                    from: LivenessState::Alive,
                    to: LivenessState::Suspected,
                    at_ms: now_ms,
                    reason: "missed_heartbeats",
                });
            }
            if record.state == LivenessState::Suspected
                && misses >= config.unresponsive_after_misses
            {
                record.state = LivenessState::Unresponsive;
                record.recovery_streak = 0;
                transitions.push(LivenessTransition {
                    source_id: source_id.clone(),
                    from: LivenessState::Suspected,
                    to: LivenessState::Unresponsive,
                    at_ms: now_ms,
                    reason: "missed_heartbeats",
                });
            }
        }
        transitions
    }

    /// Administrative kill switch. Returns whether the flag changed.
    /// Unknown sources are registered first, disabled or not.
    pub fn set_enabled(&mut self, source_id: &SourceId, enabled: bool, now_ms: u64) -> bool {
        let record = self
            .sources
            .entry(source_id.clone())
            .or_insert_with(|| HeartbeatRecord::new(now_ms));
        let changed = record.enabled != enabled;
        record.enabled = enabled;
        changed
    }

    /// Whether arbitration may trust proposals from this source right now.
    pub fn is_available(&self, source_id: &SourceId) -> bool {
        self.sources
            .get(source_id)
            .is_some_and(|r| r.enabled && r.state != LivenessState::Unresponsive)
    }

    pub fn is_enabled(&self, source_id: &SourceId) -> bool {
        self.sources.get(source_id).is_some_and(|r| r.enabled)
    }

    pub fn state_of(&self, source_id: &SourceId) -> Option<LivenessState> {
        self.sources.get(source_id).map(|r| r.state)
    }

    pub fn record(&self, source_id: &SourceId) -> Option<&HeartbeatRecord> {
        self.sources.get(source_id)
    }
}
