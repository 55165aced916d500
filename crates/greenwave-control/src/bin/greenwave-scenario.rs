//! Deterministic scenario driver for the control plane.
//!
//! Runs canned traffic scenarios against an in-memory plane with an
//! explicit clock, printing one line per applied command (or full JSON
//! records with `--json`). Every scenario checks its own expected
//! milestones, so a zero exit code means the run behaved as described.

use std::collections::BTreeMap;

use greenwave_control::arbiter::{
    AppliedVia, ControlEvent, ControlPlane, REASON_NO_PROPOSAL, REASON_SOURCE_UNRESPONSIVE,
};
use greenwave_control::autonomy::{AutonomyLevel, AutonomyRecord};
use greenwave_control::config::{ControlConfig, IntersectionSpec};
use greenwave_control::ids::{IntersectionId, PhaseId, SourceId};
use greenwave_control::plan::TimingPlan;
use greenwave_control::proposal::CommandProposal;
use greenwave_control::snapshot::{IntersectionState, NetworkSnapshot};
use greenwave_control::store::InMemoryAutonomyStore;
use greenwave_control::TickRecord;

fn main() {
    let exit_code = match run(std::env::args().skip(1).collect()) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{error}");
            2
        }
    };
    std::process::exit(exit_code);
}

fn run(args: Vec<String>) -> Result<i32, String> {
    if args.is_empty() {
        return Err(usage());
    }
    let json = args.iter().any(|a| a == "--json");

    match args[0].as_str() {
        "failover" => scenario_failover(json)?,
        "veto" => scenario_veto(json)?,
        "promotion" => scenario_promotion(json)?,
        "replay" => scenario_replay(json)?,
        "all" => {
            scenario_failover(json)?;
            scenario_veto(json)?;
            scenario_promotion(json)?;
            scenario_replay(json)?;
        }
        "print-config" => {
            let rendered = serde_json::to_string_pretty(&demo_config())
                .map_err(|err| err.to_string())?;
            println!("{rendered}");
        }
        "help" | "--help" | "-h" => {
            println!("{}", usage());
        }
        other => return Err(format!("unknown subcommand '{other}'\n\n{}", usage())),
    }
    Ok(0)
}

fn usage() -> String {
    [
        "greenwave-scenario usage:",
        "  greenwave-scenario failover       [--json]   lose a source, fall back, demote",
        "  greenwave-scenario veto           [--json]   unsafe proposal overridden at supervised",
        "  greenwave-scenario promotion      [--json]   observer earns supervised at the window",
        "  greenwave-scenario replay         [--json]   stale, duplicate, and quiet input handling",
        "  greenwave-scenario all            [--json]   every scenario in order",
        "  greenwave-scenario print-config              emit the demo configuration as JSON",
        "",
        "exit codes:",
        "  0   scenario ran and met its expected milestones",
        "  2   CLI error or scenario expectation failure",
    ]
    .join("\n")
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

fn x_main() -> IntersectionId {
    IntersectionId::from("x-main")
}

fn x_river() -> IntersectionId {
    IntersectionId::from("x-river")
}

fn ai_core() -> SourceId {
    SourceId::from("ai-core")
}

fn demo_config() -> ControlConfig {
    let mut config = ControlConfig::default();
    for id in [x_main(), x_river()] {
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
        config.intersections.insert(id.clone(), spec);
        config.fallback.plans.insert(
            id,
            TimingPlan::of_phases([(PhaseId(1), 30_000), (PhaseId(2), 30_000)]),
        );
    }
    config
}

fn demo_plane() -> Result<ControlPlane, String> {
    ControlPlane::new(demo_config(), Box::new(InMemoryAutonomyStore::new()), 0)
        .map_err(|err| err.to_string())
}

fn records_at(level: AutonomyLevel) -> BTreeMap<IntersectionId, AutonomyRecord> {
    let mut records = BTreeMap::new();
    for id in [x_main(), x_river()] {
        records.insert(
            id,
            AutonomyRecord {
                level,
                qualifying_streak: 0,
                low_confidence_run: 0,
                incidents_at_level: 0,
                last_transition_ms: 0,
            },
        );
    }
    records
}

fn proposal(intersection_id: IntersectionId, seq: u64, at_ms: u64) -> CommandProposal {
    CommandProposal {
        intersection_id,
        source_id: ai_core(),
        plan: TimingPlan::of_phases([(PhaseId(1), 20_000), (PhaseId(2), 20_000)]),
        confidence_millionths: 950_000,
        issued_at_ms: at_ms,
        seq,
    }
}

fn light_traffic(tick_ms: u64) -> NetworkSnapshot {
    let mut state = IntersectionState::new(tick_ms);
    state.queue_lengths.insert("north".to_string(), 12);
    state.queue_lengths.insert("east".to_string(), 8);
    NetworkSnapshot::new(tick_ms)
        .with_intersection(x_main(), state.clone())
        .with_intersection(x_river(), state)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_record(record: &TickRecord, json: bool) -> Result<(), String> {
    if json {
        println!(
            "{}",
            serde_json::to_string(record).map_err(|err| err.to_string())?
        );
        return Ok(());
    }
    for command in &record.commands {
        println!(
            "tick {:>8}  {:<8}  {:<17}  {:<24}  level={}",
            record.tick_ms,
            command.intersection_id,
            command.applied_via.as_str(),
            command.reason_code.as_deref().unwrap_or("-"),
            command.autonomy_level.as_str(),
        );
    }
    for transition in &record.liveness_transitions {
        println!(
            "              liveness {}: {} -> {} ({})",
            transition.source_id,
            transition.from.as_str(),
            transition.to.as_str(),
            transition.reason,
        );
    }
    for transition in &record.autonomy_transitions {
        println!(
            "              autonomy {}: {} -> {} ({})",
            transition.intersection_id,
            transition.from.as_str(),
            transition.to.as_str(),
            transition.reason,
        );
    }
    Ok(())
}

fn finish(name: &str, plane: &mut ControlPlane, json: bool) -> Result<Vec<ControlEvent>, String> {
    let events = plane.drain_events();
    if json {
        for event in &events {
            println!(
                "{}",
                serde_json::to_string(event).map_err(|err| err.to_string())?
            );
        }
    }
    let stats = serde_json::to_string(&plane.stats()).map_err(|err| err.to_string())?;
    println!("[{name}] {} events, stats {stats}", events.len());
    Ok(events)
}

fn expect(condition: bool, what: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(format!("scenario expectation failed: {what}"))
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// A healthy autonomous source stops heartbeating. The third consecutive
/// missed heartbeat makes it unresponsive; the same tick applies fallback
/// plans everywhere and demotes the affected intersections.
fn scenario_failover(json: bool) -> Result<(), String> {
    println!("== failover: source loss forces fixed-time fallback ==");
    let mut plane = demo_plane()?;
    plane.import_autonomy_state(records_at(AutonomyLevel::Autonomous), 0);

    for n in 1..=3u64 {
        let t = n * 1_000;
        plane
            .ingest(light_traffic(t - 500), t - 500)
            .map_err(|e| e.to_string())?;
        plane.heartbeat(&ai_core(), t - 500);
        plane
            .submit(proposal(x_main(), n, t - 400), t - 400)
            .map_err(|e| e.to_string())?;
        let record = plane.tick(t);
        print_record(&record, json)?;
        expect(
            record.command_for(&x_main()).unwrap().applied_via == AppliedVia::Source,
            "healthy autonomous proposals apply as source",
        )?;
    }

    // Heartbeats stop; the detector feed keeps publishing. Ticks four and
    // five only suspect the source.
    for t in [4_000u64, 5_000] {
        plane
            .ingest(light_traffic(t - 500), t - 500)
            .map_err(|e| e.to_string())?;
        let record = plane.tick(t);
        print_record(&record, json)?;
        expect(
            record.command_for(&x_main()).unwrap().reason_code.as_deref()
                == Some(REASON_NO_PROPOSAL),
            "a suspected source still counts as alive",
        )?;
    }

    plane.ingest(light_traffic(5_500), 5_500).map_err(|e| e.to_string())?;
    let record = plane.tick(6_000);
    print_record(&record, json)?;
    let command = record.command_for(&x_main()).unwrap();
    expect(
        command.applied_via == AppliedVia::Fallback
            && command.reason_code.as_deref() == Some(REASON_SOURCE_UNRESPONSIVE),
        "the third missed heartbeat forces fallback in the same tick",
    )?;
    expect(
        record
            .autonomy_transitions
            .iter()
            .any(|t| t.reason == "source_unresponsive"),
        "losing the source demotes its intersections",
    )?;
    expect(
        plane.autonomy_level(&x_main()) == AutonomyLevel::Supervised,
        "autonomous drops one level on source loss",
    )?;
    finish("failover", &mut plane, json)?;
    Ok(())
}

/// A supervised source proposes conflicting greens. The safety filter
/// substitutes the fallback plan, the incident resets the promotion
/// window, and the intersection drops back to observer.
fn scenario_veto(json: bool) -> Result<(), String> {
    println!("== veto: unsafe proposal overridden and demoted ==");
    let mut plane = demo_plane()?;
    plane.import_autonomy_state(records_at(AutonomyLevel::Supervised), 0);

    for n in 1..=3u64 {
        let t = n * 1_000;
        plane
            .ingest(light_traffic(t - 500), t - 500)
            .map_err(|e| e.to_string())?;
        plane.heartbeat(&ai_core(), t - 500);
        plane
            .submit(proposal(x_main(), n, t - 400), t - 400)
            .map_err(|e| e.to_string())?;
        let record = plane.tick(t);
        print_record(&record, json)?;
    }

    plane.ingest(light_traffic(3_500), 3_500).map_err(|e| e.to_string())?;
    plane.heartbeat(&ai_core(), 3_500);
    let mut unsafe_proposal = proposal(x_main(), 4, 3_600);
    unsafe_proposal.plan = TimingPlan::new(vec![
        greenwave_control::plan::PlanStep::new([PhaseId(1), PhaseId(2)], 20_000),
    ]);
    plane.submit(unsafe_proposal, 3_600).map_err(|e| e.to_string())?;
    let record = plane.tick(4_000);
    print_record(&record, json)?;

    let command = record.command_for(&x_main()).unwrap();
    expect(
        command.applied_via == AppliedVia::Override,
        "the vetoed proposal is replaced by the substitute",
    )?;
    expect(
        record
            .autonomy_transitions
            .iter()
            .any(|t| t.reason == "safety_veto"),
        "a veto is an incident and demotes",
    )?;
    expect(
        plane.autonomy_level(&x_main()) == AutonomyLevel::Observer,
        "supervised drops to observer after a veto",
    )?;
    finish("veto", &mut plane, json)?;
    Ok(())
}

/// Fifty consecutive qualifying observer ticks. The fiftieth promotes to
/// supervised, not one tick earlier.
fn scenario_promotion(json: bool) -> Result<(), String> {
    println!("== promotion: observer earns supervised at the window ==");
    let mut plane = demo_plane()?;
    let window = u64::from(plane.config().governor.observer_promotion_window);

    for n in 1..=window {
        let t = n * 1_000;
        plane
            .ingest(light_traffic(t - 500), t - 500)
            .map_err(|e| e.to_string())?;
        plane.heartbeat(&ai_core(), t - 500);
        plane
            .submit(proposal(x_main(), n, t - 400), t - 400)
            .map_err(|e| e.to_string())?;
        let record = plane.tick(t);
        if n >= window - 1 || !record.autonomy_transitions.is_empty() {
            print_record(&record, json)?;
        }
        if n < window {
            expect(
                plane.autonomy_level(&x_main()) == AutonomyLevel::Observer,
                "no promotion before the window fills",
            )?;
        }
    }
    expect(
        plane.autonomy_level(&x_main()) == AutonomyLevel::Supervised,
        "the final qualifying tick promotes to supervised",
    )?;
    finish("promotion", &mut plane, json)?;
    Ok(())
}

/// Replayed, stale, and missing inputs: duplicate snapshots are
/// idempotent, older ones are refused, repeated sequence numbers never
/// reach a tick, and a feed that stops publishing is flagged.
fn scenario_replay(json: bool) -> Result<(), String> {
    println!("== replay: duplicate and stale inputs ==");
    let mut plane = demo_plane()?;

    plane.ingest(light_traffic(10_000), 10_000).map_err(|e| e.to_string())?;
    plane.ingest(light_traffic(10_000), 10_100).map_err(|e| e.to_string())?;
    match plane.ingest(light_traffic(5_000), 10_200) {
        Err(err) => println!("stale snapshot refused: {err}"),
        Ok(()) => return Err("scenario expectation failed: stale snapshot accepted".to_string()),
    }

    plane.heartbeat(&ai_core(), 10_300);
    plane
        .submit(proposal(x_main(), 7, 10_400), 10_400)
        .map_err(|e| e.to_string())?;
    match plane.submit(proposal(x_main(), 7, 10_500), 10_500) {
        Err(err) => println!("replayed proposal refused: {err}"),
        Ok(()) => return Err("scenario expectation failed: replayed seq accepted".to_string()),
    }

    let record = plane.tick(11_000);
    print_record(&record, json)?;
    expect(
        record.commands.len() == plane.config().intersections.len(),
        "exactly one command per configured intersection",
    )?;

    let stats = plane.stats();
    expect(stats.snapshots_ingested == 2, "duplicate snapshot is idempotent")?;
    expect(stats.snapshots_rejected == 1, "stale snapshot counted as rejected")?;
    expect(stats.proposals_rejected == 1, "replayed proposal counted as rejected")?;

    // Then the feed goes quiet entirely.
    let record = plane.tick(17_000);
    print_record(&record, json)?;
    let events = finish("replay", &mut plane, json)?;
    expect(
        events.iter().any(|e| e.event == "snapshot_stale"),
        "a quiet snapshot feed is flagged after the staleness window",
    )?;
    Ok(())
}
