mod common;

use tempfile::TempDir;

use scouting_engine::export::export_workbook;
use scouting_engine::pipeline::{GroupStatus, PipelineOutput, Stage, run_pipeline};
use scouting_engine::profile::{Position, Stat};

use common::{synthetic_snapshot, test_config};

fn run(parallelism: usize) -> PipelineOutput {
    let mut cfg = test_config();
    cfg.parallelism = parallelism;
    let weights = cfg.weight_table().expect("weights");
    let rules = cfg.rule_book().expect("rules");
    run_pipeline(&synthetic_snapshot(), &cfg, &weights, &rules).expect("pipeline runs")
}

#[test]
fn outputs_do_not_depend_on_thread_count() {
    let a = run(1);
    let b = run(4);
    assert_eq!(a.edges, b.edges);
    assert_eq!(a.projections, b.projections);
    assert_eq!(a.archetypes, b.archetypes);
    assert_eq!(a.assignments, b.assignments);
    assert_eq!(a.groups, b.groups);
}

#[test]
fn every_group_is_reported() {
    let out = run(2);
    assert_eq!(out.failures().count(), 0);

    let similarity = out
        .groups
        .iter()
        .filter(|g| g.stage == Stage::Similarity)
        .collect::<Vec<_>>();
    assert_eq!(similarity.len(), Position::ALL.len());
    assert!(similarity.iter().all(|g| g.status == GroupStatus::Done));
    let edges = similarity.iter().map(|g| g.outputs).sum::<usize>();
    assert_eq!(edges, out.edges.len());

    let archetypes = out
        .groups
        .iter()
        .filter(|g| g.stage == Stage::Archetypes)
        .collect::<Vec<_>>();
    assert_eq!(archetypes.len(), 3);
    assert!(archetypes.iter().all(|g| g.position != Position::Goalkeeper));
    let assigned = archetypes.iter().map(|g| g.outputs).sum::<usize>();
    assert_eq!(assigned, out.assignments.len());
}

#[test]
fn small_groups_are_skipped_not_failed() {
    let mut cfg = test_config();
    cfg.similarity.min_group_size = 50;
    let weights = cfg.weight_table().expect("weights");
    let rules = cfg.rule_book().expect("rules");
    let out = run_pipeline(&synthetic_snapshot(), &cfg, &weights, &rules).expect("pipeline runs");

    let keepers = out
        .groups
        .iter()
        .find(|g| g.stage == Stage::Similarity && g.position == Position::Goalkeeper)
        .expect("goalkeeper group reported");
    assert_eq!(keepers.status, GroupStatus::Skipped);
    assert_eq!(keepers.outputs, 0);
    assert!(out.edges.iter().all(|e| e.position != Position::Goalkeeper));
    assert_eq!(out.failures().count(), 0);
    assert!(!out.edges.is_empty());
}

#[test]
fn one_failed_group_does_not_sink_the_others() {
    let cfg = test_config();
    let mut weights = cfg.weight_table().expect("weights");
    weights
        .positions
        .entry(Position::Goalkeeper)
        .or_default()
        .insert(Stat::Saves, f64::INFINITY);
    let rules = cfg.rule_book().expect("rules");
    let out = run_pipeline(&synthetic_snapshot(), &cfg, &weights, &rules).expect("pipeline runs");

    let failed = out.failures().collect::<Vec<_>>();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, Stage::Similarity);
    assert_eq!(failed[0].position, Position::Goalkeeper);
    assert_eq!(failed[0].outputs, 0);
    assert!(failed[0].detail.as_deref().is_some_and(|d| d.contains("non-finite")));

    assert!(out.edges.iter().all(|e| e.position != Position::Goalkeeper));
    for position in [Position::Defender, Position::Midfielder, Position::Forward] {
        assert!(out.edges.iter().any(|e| e.position == position), "{position} has no edges");
    }
    assert!(
        out.groups
            .iter()
            .filter(|g| g.stage == Stage::Archetypes)
            .all(|g| g.status == GroupStatus::Done)
    );
    assert!(!out.projections.is_empty());
}

#[test]
fn edges_are_sorted_by_origin_then_rank() {
    let out = run(2);
    for pair in out.edges.windows(2) {
        let a = (&pair[0].origin_player_id, pair[0].origin_season, pair[0].position, pair[0].rank);
        let b = (&pair[1].origin_player_id, pair[1].origin_season, pair[1].position, pair[1].rank);
        assert!(a < b);
    }
}

#[test]
fn summary_json_carries_projection_and_groups() {
    let out = run(2);
    let summary = out.summary_json().expect("summary serializes");
    let parsed: serde_json::Value = serde_json::from_str(&summary).expect("json");
    assert_eq!(
        parsed["projection"]["projected"].as_u64(),
        Some(out.projections.len() as u64)
    );
    let groups = parsed["groups"].as_array().expect("groups array");
    assert_eq!(groups.len(), out.groups.len());
    assert_eq!(groups[0]["stage"], "similarity");
    assert!(out.run_id.starts_with("run-"));
}

#[test]
fn workbook_export_counts_rows() {
    let out = run(2);
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("scouting.xlsx");
    let report = export_workbook(&path, &out).expect("export");
    assert!(path.exists());
    assert_eq!(report.edges, out.edges.len());
    assert_eq!(report.projections, out.projections.len());
    assert_eq!(report.archetypes, out.archetypes.len());
    assert_eq!(report.assignments, out.assignments.len());
}
