use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use scouting_engine::config::{self, EngineConfig};
use scouting_engine::export;
use scouting_engine::pipeline::{self, GroupStatus};
use scouting_engine::warehouse::{self, Warehouse};

fn main() -> Result<()> {
    let config_path = parse_path_arg("--config");
    let mut cfg = EngineConfig::load(config_path.as_deref())?;
    if let Some(db) = parse_path_arg("--db") {
        cfg.warehouse.db_path = db;
    }
    cfg.logging.init();

    let weights = cfg.weight_table().context("load weight table")?;
    let rules = cfg.rule_book().context("load archetype rules")?;
    let dry_run = has_flag("--dry-run");

    let mut store = Warehouse::open(&cfg.warehouse)?;
    let profiles = match parse_path_arg("--parquet") {
        Some(path) => warehouse::load_parquet_profiles(&path)?,
        None => store.load_profiles()?,
    };
    if profiles.is_empty() {
        return Err(anyhow!("no player-season profiles loaded"));
    }

    let out = pipeline::run_pipeline(&profiles, &cfg, &weights, &rules)?;

    if let Some(path) = parse_path_arg("--xlsx") {
        export::export_workbook(&path, &out)?;
    }
    if dry_run {
        tracing::info!(run_id = %out.run_id, "dry run, outputs not published");
    } else {
        store.publish(&out)?;
    }

    println!("Scouting run {}", out.run_id);
    println!("Profiles: {}", out.profiles);
    println!("Similarity edges: {}", out.edges.len());
    println!(
        "Value projections: {} (season {}, train r2 {:.3}, test r2 {:.3})",
        out.projections.len(),
        out.projection
            .inference_season
            .map(|s| s.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
        out.projection.train_r2,
        out.projection.test_r2
    );
    println!(
        "Archetypes: {} clusters, {} assignments",
        out.archetypes.len(),
        out.assignments.len()
    );
    for g in &out.groups {
        let status = match g.status {
            GroupStatus::Done => "done",
            GroupStatus::Skipped => "skipped",
            GroupStatus::Failed => "FAILED",
        };
        println!(
            "  {:?}/{}: {} players, {} rows, {status}",
            g.stage, g.position, g.players, g.outputs
        );
        if let Some(detail) = &g.detail {
            println!("    {detail}");
        }
    }
    if dry_run {
        println!("Dry run: warehouse not updated");
    }

    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    config::path_arg(&args, flag)
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|a| a == flag)
}
