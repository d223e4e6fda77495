use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use scouting_engine::config::{self, EngineConfig};
use scouting_engine::profile::Position;
use scouting_engine::weights::similarity_stats;

fn main() -> Result<()> {
    let cfg = EngineConfig::load(parse_path_arg("--config").as_deref())?;
    let weights = cfg.weight_table().context("load weight table")?;
    weights.validate()?;
    let rules = cfg.rule_book().context("load archetype rules")?;
    rules.validate()?;

    if let Some(dir) = parse_path_arg("--write-defaults") {
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let pairs = [
            ("config.json", serde_json::to_string_pretty(&cfg)?),
            ("weights.json", serde_json::to_string_pretty(&weights)?),
            ("rules.json", serde_json::to_string_pretty(&rules)?),
        ];
        for (name, raw) in pairs {
            let path = dir.join(name);
            fs::write(&path, raw).with_context(|| format!("write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
    }

    println!("Config OK");
    println!("DB: {}", cfg.warehouse.db_path.display());
    println!("Source table: {}", cfg.warehouse.source_table);
    println!("Parallelism: {}", cfg.parallelism);
    println!(
        "Similarity: min_minutes>{} rating>{} k={} neighbors={} lambda={} stage={:?}",
        cfg.similarity.min_minutes,
        cfg.similarity.min_rating,
        cfg.similarity.search_k,
        cfg.similarity.neighbors,
        cfg.similarity.decay_lambda,
        cfg.similarity.weight_stage
    );

    println!("Weight table v{}", weights.version);
    for position in Position::ALL {
        let stats = similarity_stats(position);
        let row = stats
            .iter()
            .zip(weights.vector(position, stats))
            .map(|(s, w)| format!("{s}={w}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("  {position}: {row}");
    }

    println!("Archetype rules v{} ({} rules)", rules.version, rules.rules.len());
    for (idx, rule) in rules.rules.iter().enumerate() {
        let scope = if rule.positions.is_empty() {
            "all".to_string()
        } else {
            rule.positions
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "  {:>2}. {} [{scope}] {} conditions",
            idx + 1,
            rule.label,
            rule.conditions.len()
        );
    }
    println!("  fallback: {}", rules.fallback);
    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    config::path_arg(&args, flag)
}
