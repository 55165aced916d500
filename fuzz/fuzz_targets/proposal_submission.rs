#![no_main]

use greenwave_control::arbiter::ControlPlane;
use greenwave_control::config::{ControlConfig, IntersectionSpec};
use greenwave_control::ids::{IntersectionId, PhaseId, SourceId};
use greenwave_control::liveness::LivenessConfig;
use greenwave_control::plan::{PlanStep, TimingPlan};
use greenwave_control::proposal::CommandProposal;
use greenwave_control::store::InMemoryAutonomyStore;
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 6;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Raw bytes straight into the decode path first.
    if let Ok(proposal) = serde_json::from_slice::<CommandProposal>(data) {
        let _ = proposal.validate();
    }

    let proposal = build_proposal(data);
    let _ = proposal.validate();

    if let Ok(json) = serde_json::to_string(&proposal)
        && let Ok(decoded) = serde_json::from_str::<CommandProposal>(&json)
    {
        assert_eq!(proposal, decoded);
    }

    // Arbitrary plans must never panic the guardian or the selection rule.
    let mut plane = plane();
    let source = proposal.source_id.clone();
    plane.heartbeat(&source, 500);
    let _ = plane.submit(proposal, 600);
    let record = plane.tick(1_000);
    assert_eq!(record.commands.len(), 1);
    let _ = plane.tick(u64::from(byte(data, 14)) * 1_000 + 2_000);
});

fn plane() -> ControlPlane {
    let mut config = ControlConfig::default();
    config.liveness = LivenessConfig {
        startup_grace_ms: 0,
        ..LivenessConfig::default()
    };
    let mut spec = IntersectionSpec::new(SourceId::from("ai-core"));
    spec.phases = (0..8u16).map(PhaseId).collect();
    spec.conflicts = [(PhaseId(1), PhaseId(2)), (PhaseId(3), PhaseId(4))]
        .into_iter()
        .collect();
    spec.baseline_queue_total = Some(40);
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

fn build_proposal(data: &[u8]) -> CommandProposal {
    let intersection_id = match byte(data, 0) % 4 {
        0 => IntersectionId::from(""),
        1 => IntersectionId::from("x-main"),
        2 => IntersectionId::from("x-ghost"),
        _ => IntersectionId::new("x".repeat(usize::from(byte(data, 1)))),
    };
    let source_id = match byte(data, 2) % 3 {
        0 => SourceId::from("ai-core"),
        1 => SourceId::from("ai-other"),
        _ => SourceId::from(""),
    };

    let steps = (0..usize::from(byte(data, 3)) % MAX_STEPS)
        .map(|index| {
            let greens_mask = byte(data, 4 + index);
            let greens = (0..8u16)
                .filter(|bit| greens_mask & (1u8 << bit) != 0)
                .map(PhaseId);
            let duration = u32::from_le_bytes([
                byte(data, 10 + index),
                byte(data, 11 + index),
                byte(data, 12 + index),
                0,
            ]);
            PlanStep::new(greens, duration)
        })
        .collect();

    CommandProposal {
        intersection_id,
        source_id,
        plan: TimingPlan::new(steps),
        confidence_millionths: i64::from_le_bytes([
            byte(data, 5),
            byte(data, 6),
            byte(data, 7),
            byte(data, 8),
            0,
            0,
            0,
            byte(data, 9),
        ]),
        issued_at_ms: u64::from(byte(data, 10)),
        seq: u64::from(byte(data, 11)).saturating_add(1),
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
