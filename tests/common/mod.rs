#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use scouting_engine::config::EngineConfig;
use scouting_engine::profile::{PlayerSeasonProfile, Position, Stat};

pub const SEASONS: [i32; 3] = [2022, 2023, 2024];

fn base_stats(position: Position) -> &'static [(Stat, f64)] {
    match position {
        Position::Goalkeeper => &[
            (Stat::Saves, 2.8),
            (Stat::Claims, 1.1),
            (Stat::SweeperActions, 0.7),
            (Stat::ProgressivePasses, 1.5),
        ],
        Position::Defender => &[
            (Stat::Goals, 0.04),
            (Stat::Assists, 0.05),
            (Stat::Xg, 0.05),
            (Stat::Xa, 0.06),
            (Stat::ShotsOnTarget, 0.1),
            (Stat::KeyPasses, 0.5),
            (Stat::ProgressivePasses, 4.0),
            (Stat::Dribbles, 0.4),
            (Stat::Recoveries, 5.5),
            (Stat::Interceptions, 1.4),
            (Stat::Tackles, 1.8),
            (Stat::AerialsWon, 2.4),
            (Stat::Clearances, 3.5),
        ],
        Position::Midfielder => &[
            (Stat::Goals, 0.12),
            (Stat::Assists, 0.15),
            (Stat::Xg, 0.14),
            (Stat::Xa, 0.16),
            (Stat::ShotsOnTarget, 0.4),
            (Stat::KeyPasses, 1.4),
            (Stat::ProgressivePasses, 5.5),
            (Stat::Dribbles, 1.2),
            (Stat::Recoveries, 5.0),
            (Stat::Interceptions, 1.0),
            (Stat::Tackles, 1.9),
            (Stat::AerialsWon, 0.9),
            (Stat::Clearances, 0.8),
        ],
        Position::Forward => &[
            (Stat::Goals, 0.42),
            (Stat::Assists, 0.18),
            (Stat::Xg, 0.45),
            (Stat::Xa, 0.17),
            (Stat::ShotsOnTarget, 1.1),
            (Stat::KeyPasses, 1.2),
            (Stat::ProgressivePasses, 2.0),
            (Stat::Dribbles, 2.1),
            (Stat::Recoveries, 2.2),
            (Stat::Interceptions, 0.3),
            (Stat::Tackles, 0.6),
            (Stat::AerialsWon, 1.3),
            (Stat::Clearances, 0.3),
        ],
    }
}

/// Style 0 leans attacking, 1 creative, 2 defensive.
fn style_boost(style: usize, stat: Stat) -> f64 {
    let boosted = match style {
        0 => matches!(stat, Stat::Xg | Stat::Goals | Stat::ShotsOnTarget | Stat::Dribbles),
        1 => matches!(stat, Stat::Xa | Stat::KeyPasses | Stat::ProgressivePasses),
        _ => matches!(
            stat,
            Stat::Tackles | Stat::Recoveries | Stat::Interceptions | Stat::AerialsWon | Stat::Clearances
        ),
    };
    if boosted { 1.6 } else { 1.0 }
}

/// Deterministic three-season snapshot: 36 players per outfield position and
/// 12 goalkeepers, every row above the default eligibility floors.
pub fn synthetic_snapshot() -> Vec<PlayerSeasonProfile> {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut out = Vec::new();
    for position in Position::ALL {
        let count = if position == Position::Goalkeeper { 12 } else { 36 };
        for n in 0..count {
            let id = format!("{}{:03}", &position.as_str()[..2], n);
            let base_age: f64 = rng.gen_range(18.0..30.0);
            let talent: f64 = rng.gen_range(0.0..1.0);
            let mut value: f64 = rng.gen_range(1.5e6..4.0e7);
            let style = n % 3;
            for (si, season) in SEASONS.iter().enumerate() {
                let age = base_age + si as f64;
                let mut p = PlayerSeasonProfile::new(id.clone(), *season, position);
                p.name = format!("Player {id}");
                p.team = format!("Club {}", n % 8);
                p.age = Some(age);
                p.market_value = Some(value.round());
                p.minutes_played = rng.gen_range(950.0..3200.0_f64).round();
                p.matches_played = (p.minutes_played / 80.0) as u32;
                for (stat, base) in base_stats(position) {
                    let noise: f64 = rng.gen_range(0.85..1.15);
                    let v = base * style_boost(style, *stat) * (0.8 + 0.5 * talent) * noise;
                    p.set_stat(*stat, v);
                }
                p.set_stat(Stat::Rating, 6.6 + 1.1 * talent + rng.gen_range(0.0..0.1));
                let pct = (100.0 * talent).clamp(1.0, 99.0);
                for stat in [Stat::Rating, Stat::Xg, Stat::Xa, Stat::ProgressivePasses] {
                    p.set_percentile(stat, (pct + rng.gen_range(-5.0..5.0)).clamp(0.0, 100.0));
                }
                out.push(p);

                let growth = 0.3 * talent - 0.03 * (age - 24.0) + rng.gen_range(-0.08..0.08);
                value = (value * (1.0 + growth)).max(2.5e5);
            }
        }
    }
    out
}

/// Latest-season veteran who clears every projection floor except age.
pub fn veteran(age: f64) -> PlayerSeasonProfile {
    let mut p = PlayerSeasonProfile::new("vet001", SEASONS[2], Position::Midfielder);
    p.name = "Veteran".into();
    p.team = "Club 0".into();
    p.age = Some(age);
    p.market_value = Some(8.0e6);
    p.minutes_played = 3000.0;
    p.matches_played = 34;
    for (stat, base) in base_stats(Position::Midfielder) {
        p.set_stat(*stat, *base);
    }
    p.set_stat(Stat::Rating, 7.9);
    p
}

/// An eligible forward whose only varying stat is xg.
pub fn forward_with_xg(id: &str, season: i32, xg: f64) -> PlayerSeasonProfile {
    let mut p = PlayerSeasonProfile::new(id, season, Position::Forward);
    p.name = id.to_uppercase();
    p.team = "Club".into();
    p.minutes_played = 1500.0;
    p.matches_played = 20;
    p.set_stat(Stat::Xg, xg);
    p.set_stat(Stat::Rating, 7.0);
    p
}

pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.parallelism = 2;
    cfg.projection.boosting.n_estimators = 60;
    cfg.archetypes.n_init = 5;
    cfg
}
