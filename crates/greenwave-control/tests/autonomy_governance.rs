// Integration tests for staged autonomy: exact promotion windows, incident
// resets, the performance bar for full autonomy, and governance persistence
// across restarts, including degraded-store demotion and recovery.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use greenwave_control::arbiter::{AppliedVia, ControlPlane};
use greenwave_control::autonomy::{AutonomyLevel, AutonomyRecord};
use greenwave_control::config::{ControlConfig, IntersectionSpec};
use greenwave_control::ids::{IntersectionId, PhaseId, SourceId};
use greenwave_control::liveness::LivenessConfig;
use greenwave_control::plan::{PlanStep, TimingPlan};
use greenwave_control::proposal::CommandProposal;
use greenwave_control::snapshot::{IntersectionState, NetworkSnapshot};
use greenwave_control::store::{
    AutonomyStore, InMemoryAutonomyStore, JsonFileAutonomyStore, StoreError,
};

fn x_main() -> IntersectionId {
    IntersectionId::from("x-main")
}

fn ai_core() -> SourceId {
    SourceId::from("ai-core")
}

// A long startup grace keeps liveness quiet; these tests are about the
// governor, not the heartbeat ladder.
fn corridor_config() -> ControlConfig {
    let mut config = ControlConfig::default();
    config.liveness = LivenessConfig {
        startup_grace_ms: 60_000,
        ..LivenessConfig::default()
    };
    let mut spec = IntersectionSpec::new(ai_core());
    spec.phases = [PhaseId(0), PhaseId(1), PhaseId(2)].into_iter().collect();
    spec.conflicts = [(PhaseId(1), PhaseId(2))].into_iter().collect();
    spec.phase_serves.insert(
        PhaseId(1),
        ["north".to_string(), "south".to_string()].into_iter().collect(),
    );
    spec.phase_serves.insert(
        PhaseId(2),
        ["east".to_string(), "west".to_string()].into_iter().collect(),
    );
    spec.baseline_queue_total = Some(40);
    config.intersections.insert(x_main(), spec);
    config.fallback.plans.insert(
        x_main(),
        TimingPlan::of_phases([(PhaseId(1), 30_000), (PhaseId(2), 30_000)]),
    );
    config
}

fn plane_with(config: ControlConfig) -> ControlPlane {
    ControlPlane::new(config, Box::new(InMemoryAutonomyStore::new()), 0).unwrap()
}

fn supervised_record() -> BTreeMap<IntersectionId, AutonomyRecord> {
    records_at(AutonomyLevel::Supervised)
}

fn records_at(level: AutonomyLevel) -> BTreeMap<IntersectionId, AutonomyRecord> {
    [(
        x_main(),
        AutonomyRecord {
            level,
            qualifying_streak: 0,
            low_confidence_run: 0,
            incidents_at_level: 0,
            last_transition_ms: 0,
        },
    )]
    .into_iter()
    .collect()
}

fn proposal(seq: u64) -> CommandProposal {
    CommandProposal {
        intersection_id: x_main(),
        source_id: ai_core(),
        plan: TimingPlan::of_phases([(PhaseId(1), 20_000), (PhaseId(2), 20_000)]),
        confidence_millionths: 950_000,
        issued_at_ms: seq * 1_000,
        seq,
    }
}

fn conflicting(seq: u64) -> CommandProposal {
    let mut unsafe_proposal = proposal(seq);
    unsafe_proposal.plan = TimingPlan::new(vec![PlanStep::new([PhaseId(1), PhaseId(2)], 20_000)]);
    unsafe_proposal
}

fn traffic(tick_ms: u64, north: u32, east: u32) -> NetworkSnapshot {
    let mut state = IntersectionState::new(tick_ms);
    state.queue_lengths.insert("north".to_string(), north);
    state.queue_lengths.insert("east".to_string(), east);
    let mut snapshot = NetworkSnapshot::new(tick_ms);
    snapshot.intersections.insert(x_main(), state);
    snapshot
}

// ---------------------------------------------------------------------------
// Promotion windows
// ---------------------------------------------------------------------------

#[test]
fn observer_promotion_lands_exactly_on_the_default_window() {
    let mut plane = plane_with(corridor_config());

    for n in 1..=49u64 {
        plane.submit(proposal(n), n * 1_000 - 400).unwrap();
        let record = plane.tick(n * 1_000);
        assert_eq!(
            record.command_for(&x_main()).unwrap().applied_via,
            AppliedVia::ObserverFallback
        );
    }
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Observer);

    plane.submit(proposal(50), 49_600).unwrap();
    let record = plane.tick(50_000);
    let transition = record
        .autonomy_transitions
        .first()
        .expect("the fiftieth qualifying tick promotes");
    assert_eq!(transition.intersection_id, x_main());
    assert_eq!(transition.from, AutonomyLevel::Observer);
    assert_eq!(transition.to, AutonomyLevel::Supervised);
    assert_eq!(transition.reason, "promotion_window");
    assert_eq!(transition.at_ms, 50_000);
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);

    let records = plane.export_autonomy_state();
    assert_eq!(records[&x_main()].qualifying_streak, 0);
    assert_eq!(records[&x_main()].incidents_at_level, 0);
    assert_eq!(records[&x_main()].last_transition_ms, 50_000);
}

#[test]
fn a_veto_resets_the_promotion_window() {
    let mut config = corridor_config();
    config.governor.observer_promotion_window = 5;
    let mut plane = plane_with(config);

    for n in 1..=3u64 {
        plane.submit(proposal(n), n * 1_000 - 400).unwrap();
        plane.tick(n * 1_000);
    }
    plane.submit(conflicting(4), 3_600).unwrap();
    plane.tick(4_000);
    let records = plane.export_autonomy_state();
    assert_eq!(records[&x_main()].qualifying_streak, 0);
    assert_eq!(records[&x_main()].incidents_at_level, 1);

    // Four more clean ticks rebuild most of the streak.
    for n in 5..=8u64 {
        plane.submit(proposal(n), n * 1_000 - 400).unwrap();
        plane.tick(n * 1_000);
    }
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Observer);

    plane.submit(proposal(9), 8_600).unwrap();
    let record = plane.tick(9_000);
    assert_eq!(record.autonomy_transitions.len(), 1);
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);
}

#[test]
fn full_autonomy_requires_beating_the_baseline() {
    let mut config = corridor_config();
    config.governor.supervised_promotion_window = 3;
    let mut plane = plane_with(config);
    plane.import_autonomy_state(supervised_record(), 0);
    plane.ingest(traffic(900, 12, 8), 900).unwrap();

    for n in 1..=2u64 {
        plane.submit(proposal(n), n * 1_000 - 400).unwrap();
        let record = plane.tick(n * 1_000);
        let applied = record.command_for(&x_main()).unwrap();
        assert_eq!(applied.applied_via, AppliedVia::Source);
        assert_eq!(applied.source_id, Some(ai_core()));
        assert_eq!(applied.proposal_seq, Some(n));
    }
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);

    plane.submit(proposal(3), 2_600).unwrap();
    let record = plane.tick(3_000);
    assert_eq!(record.autonomy_transitions.len(), 1);
    assert_eq!(record.autonomy_transitions[0].to, AutonomyLevel::Autonomous);
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Autonomous);
}

#[test]
fn congested_ticks_do_not_count_toward_full_autonomy() {
    let mut config = corridor_config();
    config.governor.supervised_promotion_window = 3;
    let mut plane = plane_with(config);
    plane.import_autonomy_state(supervised_record(), 0);
    // Twice the baseline queue: the ratio sits well under the margin.
    plane.ingest(traffic(900, 50, 30), 900).unwrap();

    for n in 1..=4u64 {
        plane.submit(proposal(n), n * 1_000 - 400).unwrap();
        let record = plane.tick(n * 1_000);
        assert_eq!(
            record.command_for(&x_main()).unwrap().applied_via,
            AppliedVia::Source
        );
    }
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);
    assert_eq!(plane.export_autonomy_state()[&x_main()].qualifying_streak, 0);
}

#[test]
fn no_baseline_means_no_path_past_supervised() {
    let mut config = corridor_config();
    config.governor.supervised_promotion_window = 3;
    config
        .intersections
        .get_mut(&x_main())
        .unwrap()
        .baseline_queue_total = None;
    let mut plane = plane_with(config);
    plane.import_autonomy_state(supervised_record(), 0);
    plane.ingest(traffic(900, 12, 8), 900).unwrap();

    for n in 1..=4u64 {
        plane.submit(proposal(n), n * 1_000 - 400).unwrap();
        plane.tick(n * 1_000);
    }
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn governance_survives_a_restart_through_the_json_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("autonomy.json");

    let mut plane = ControlPlane::new(
        corridor_config(),
        Box::new(JsonFileAutonomyStore::new(&path)),
        0,
    )
    .unwrap();
    plane.import_autonomy_state(supervised_record(), 0);
    plane.tick(1_000);
    drop(plane);
    assert!(path.exists());

    let mut restarted = ControlPlane::new(
        corridor_config(),
        Box::new(JsonFileAutonomyStore::new(&path)),
        2_000,
    )
    .unwrap();
    assert_eq!(restarted.autonomy_level(&x_main()), AutonomyLevel::Supervised);
    assert!(restarted
        .drain_events()
        .iter()
        .any(|e| e.event == "governance_restored"));
}

#[test]
fn a_corrupt_store_file_starts_everyone_at_observer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("autonomy.json");
    fs::write(&path, b"{ not json").unwrap();

    let mut plane = ControlPlane::new(
        corridor_config(),
        Box::new(JsonFileAutonomyStore::new(&path)),
        0,
    )
    .unwrap();
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Observer);
    let events = plane.drain_events();
    let failure = events
        .iter()
        .find(|e| e.event == "governance_restore_failed")
        .expect("a corrupt file is reported, not fatal");
    assert_eq!(failure.error_code, Some("GW-STORE-0002"));
    assert_eq!(plane.stats().store_failures, 1);
}

struct FlakyStore {
    fail: Arc<AtomicBool>,
    inner: InMemoryAutonomyStore,
}

impl AutonomyStore for FlakyStore {
    fn save(
        &mut self,
        records: &BTreeMap<IntersectionId, AutonomyRecord>,
    ) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk offline")));
        }
        self.inner.save(records)
    }

    fn load(&mut self) -> Result<Option<BTreeMap<IntersectionId, AutonomyRecord>>, StoreError> {
        self.inner.load()
    }
}

#[test]
fn a_recovered_store_ends_the_degradation_episode() {
    let fail = Arc::new(AtomicBool::new(true));
    let mut plane = ControlPlane::new(
        corridor_config(),
        Box::new(FlakyStore {
            fail: Arc::clone(&fail),
            inner: InMemoryAutonomyStore::new(),
        }),
        0,
    )
    .unwrap();
    plane.import_autonomy_state(records_at(AutonomyLevel::Autonomous), 0);

    // First failed write only marks the episode.
    plane.tick(1_000);
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Autonomous);

    // Second consecutive failure demotes one step, once.
    let record = plane.tick(2_000);
    assert!(record
        .autonomy_transitions
        .iter()
        .any(|t| t.reason == "store_degraded"));
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);

    // A successful save closes the episode and says so.
    fail.store(false, Ordering::SeqCst);
    plane.tick(3_000);
    assert_eq!(plane.autonomy_level(&x_main()), AutonomyLevel::Supervised);
    assert_eq!(plane.stats().store_failures, 2);

    let events = plane.drain_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event == "governance_store_write_failed")
            .count(),
        2
    );
    assert!(events.iter().any(|e| e.event == "governance_store_recovered"));
}
