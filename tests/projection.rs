mod common;

use std::collections::BTreeSet;

use scouting_engine::config::ProjectionConfig;
use scouting_engine::profile::{latest_season, primary_rows};
use scouting_engine::projection::{build_transitions, is_projection_eligible, project_values};

use common::{synthetic_snapshot, test_config, veteran};

fn projection_config() -> ProjectionConfig {
    test_config().projection
}

#[test]
fn veteran_is_never_projected() {
    let mut snapshot = synthetic_snapshot();
    snapshot.push(veteran(32.0));
    let (projections, report) =
        project_values(&snapshot, &projection_config()).expect("projection should train");
    assert!(report.projected > 0);
    assert!(projections.iter().all(|p| p.player_id != "vet001"));
    assert!(projections.iter().all(|p| p.age <= 28.0));
}

#[test]
fn projections_exist_iff_eligible() {
    let mut snapshot = synthetic_snapshot();
    snapshot.push(veteran(32.0));
    // Knock a few latest-season rows below individual floors.
    for (i, p) in snapshot
        .iter_mut()
        .filter(|p| p.season == 2024)
        .take(6)
        .enumerate()
    {
        match i % 3 {
            0 => p.minutes_played = 500.0,
            1 => p.market_value = None,
            _ => p.age = None,
        }
    }
    let cfg = projection_config();
    let (projections, report) = project_values(&snapshot, &cfg).expect("projection should train");

    let season = latest_season(&snapshot).expect("snapshot has seasons");
    assert_eq!(report.inference_season, Some(season));
    let projected = projections
        .iter()
        .map(|p| p.player_id.as_str())
        .collect::<BTreeSet<_>>();
    assert_eq!(projected.len(), projections.len(), "one projection per player-season");

    for (&(player_id, row_season), p) in &primary_rows(&snapshot) {
        if row_season != season {
            continue;
        }
        assert_eq!(
            projected.contains(player_id),
            is_projection_eligible(p, &cfg),
            "eligibility mismatch for {player_id}"
        );
    }
}

#[test]
fn projected_value_follows_delta() {
    let (projections, _) =
        project_values(&synthetic_snapshot(), &projection_config()).expect("projection trains");
    for p in &projections {
        let expected = p.current_value * (1.0 + p.projected_delta_pct / 100.0);
        assert!((p.projected_value - expected).abs() < 1e-6 * p.current_value.max(1.0));
        assert!(p.projected_delta_pct.is_finite());
    }
}

#[test]
fn training_split_and_diagnostics_are_reported() {
    let snapshot = synthetic_snapshot();
    let cfg = projection_config();
    let n = build_transitions(&snapshot, &cfg).len();
    let (_, report) = project_values(&snapshot, &cfg).expect("projection trains");
    assert_eq!(report.transitions, n);
    assert_eq!(report.test_rows, (n as f64 * 0.2).ceil() as usize);
    assert_eq!(report.train_rows + report.test_rows, n);
    assert!(report.train_r2.is_finite());
    assert!(report.test_r2.is_finite());
    assert!(report.train_r2 > 0.0);
}

#[test]
fn same_seed_same_projections() {
    let snapshot = synthetic_snapshot();
    let cfg = projection_config();
    let (a, _) = project_values(&snapshot, &cfg).expect("first run");
    let (b, _) = project_values(&snapshot, &cfg).expect("second run");
    assert_eq!(a, b);
}

#[test]
fn empty_history_fails_instead_of_guessing() {
    let only_latest = synthetic_snapshot()
        .into_iter()
        .filter(|p| p.season == 2024)
        .collect::<Vec<_>>();
    let err = project_values(&only_latest, &projection_config())
        .expect_err("no transitions must fail the run");
    assert!(format!("{err:#}").contains("transitions"));
    assert!(project_values(&[], &projection_config()).is_err());
}
