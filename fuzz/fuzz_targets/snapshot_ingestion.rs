#![no_main]

use greenwave_control::arbiter::ControlPlane;
use greenwave_control::config::{ControlConfig, IntersectionSpec};
use greenwave_control::ids::{IntersectionId, PhaseId, SourceId};
use greenwave_control::plan::TimingPlan;
use greenwave_control::snapshot::{IntersectionState, NetworkSnapshot};
use greenwave_control::store::InMemoryAutonomyStore;
use libfuzzer_sys::fuzz_target;

const MAX_FUZZ_INTERSECTIONS: u8 = 5;
const MAX_FUZZ_APPROACHES: u8 = 20;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Raw bytes straight into the decode path first.
    if let Ok(snapshot) = serde_json::from_slice::<NetworkSnapshot>(data) {
        let _ = snapshot.validate();
    }

    let snapshot = build_snapshot(data);
    let _ = snapshot.validate();

    if let Ok(json) = serde_json::to_string(&snapshot)
        && let Ok(decoded) = serde_json::from_str::<NetworkSnapshot>(&json)
    {
        assert_eq!(snapshot, decoded);
    }

    // Ingestion, replay, and regression must refuse or accept cleanly.
    let mut plane = plane();
    let _ = plane.ingest(snapshot.clone(), 500);
    let _ = plane.ingest(snapshot.clone(), 600);
    let mut stale = snapshot;
    stale.tick_ms = stale.tick_ms.wrapping_sub(u64::from(byte(data, 0)) + 1);
    let _ = plane.ingest(stale, 700);

    let record = plane.tick(1_000);
    assert_eq!(record.commands.len(), 1);
    assert_eq!(record.digest.len(), 64);
});

fn plane() -> ControlPlane {
    let mut config = ControlConfig::default();
    let mut spec = IntersectionSpec::new(SourceId::from("ai-core"));
    spec.phases = (0..4u16).map(PhaseId).collect();
    spec.conflicts = [(PhaseId(1), PhaseId(2))].into_iter().collect();
    config
        .intersections
        .insert(IntersectionId::from("x-main"), spec);
    config.fallback.plans.insert(
        IntersectionId::from("x-main"),
        TimingPlan::of_phases([(PhaseId(1), 30_000), (PhaseId(2), 30_000)]),
    );
    ControlPlane::new(config, Box::new(InMemoryAutonomyStore::new()), 0)
        .expect("fixed fuzz configuration is valid")
}

fn build_snapshot(data: &[u8]) -> NetworkSnapshot {
    let mut snapshot = NetworkSnapshot::new(u64::from(byte(data, 0)) * 100);
    for index in 0..byte(data, 1) % MAX_FUZZ_INTERSECTIONS {
        let id = match byte(data, 2 + usize::from(index)) % 4 {
            0 => IntersectionId::from("x-main"),
            1 => IntersectionId::from("x-ghost"),
            2 => IntersectionId::from(""),
            _ => IntersectionId::new(format!("x-{index}")),
        };
        snapshot
            .intersections
            .insert(id, build_state(data, usize::from(index)));
    }
    snapshot
}

fn build_state(data: &[u8], salt: usize) -> IntersectionState {
    let mut state = IntersectionState::new(u64::from(byte(data, salt)));
    for phase in 0..byte(data, salt + 1) % 6 {
        state.active_greens.insert(PhaseId(u16::from(phase)));
    }
    for index in 0..byte(data, salt + 2) % MAX_FUZZ_APPROACHES {
        let name = match byte(data, salt + 3 + usize::from(index)) % 4 {
            0 => "north".to_string(),
            1 => String::new(),
            2 => "a".repeat(usize::from(byte(data, salt + 4))),
            _ => format!("approach-{index}"),
        };
        state
            .queue_lengths
            .insert(name, u32::from(byte(data, salt + 5 + usize::from(index))));
    }
    state
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
