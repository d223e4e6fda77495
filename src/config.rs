use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::archetypes::ArchetypeRuleBook;
use crate::logging::LoggingConfig;
use crate::profile::Position;
use crate::weights::WeightTable;

pub const CONFIG_PATH_ENV: &str = "SCOUT_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub warehouse: WarehouseConfig,
    pub similarity: SimilarityConfig,
    pub projection: ProjectionConfig,
    pub archetypes: ArchetypeConfig,
    pub logging: LoggingConfig,
    pub parallelism: usize,
    pub weights_path: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warehouse: WarehouseConfig::default(),
            similarity: SimilarityConfig::default(),
            projection: ProjectionConfig::default(),
            archetypes: ArchetypeConfig::default(),
            logging: LoggingConfig::default(),
            parallelism: 6,
            weights_path: None,
            rules_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub db_path: PathBuf,
    pub source_table: String,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("scouting.sqlite"),
            source_table: "player_season_stats".to_string(),
            retry_attempts: 4,
            retry_backoff_ms: 500,
        }
    }
}

/// Whether position weights multiply raw values before standardisation or
/// the standardised values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightStage {
    BeforeScaling,
    AfterScaling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Rows need strictly more minutes than this.
    pub min_minutes: f64,
    /// Rows need a strictly higher average rating than this.
    pub min_rating: f64,
    pub min_group_size: usize,
    /// Index query size, origin included.
    pub search_k: usize,
    pub neighbors: usize,
    pub decay_lambda: f64,
    pub weight_stage: WeightStage,
    pub excluded_positions: Vec<Position>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_minutes: 400.0,
            min_rating: 6.0,
            min_group_size: 10,
            search_k: 11,
            neighbors: 5,
            decay_lambda: 0.95,
            weight_stage: WeightStage::BeforeScaling,
            excluded_positions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub age_ceiling: f64,
    pub train_min_value: f64,
    pub train_min_minutes: f64,
    pub inference_min_minutes: f64,
    pub test_fraction: f64,
    pub seed: u64,
    pub min_training_examples: usize,
    pub boosting: BoostingParams,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            age_ceiling: 28.0,
            train_min_value: 1_000_000.0,
            train_min_minutes: 500.0,
            inference_min_minutes: 900.0,
            test_fraction: 0.2,
            seed: 42,
            min_training_examples: 10,
            boosting: BoostingParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchetypeConfig {
    pub min_minutes: f64,
    pub min_rating: f64,
    pub min_group_size: usize,
    pub players_per_cluster: usize,
    pub min_clusters: usize,
    pub max_clusters: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub excluded_positions: Vec<Position>,
}

impl Default for ArchetypeConfig {
    fn default() -> Self {
        Self {
            min_minutes: 900.0,
            min_rating: 6.5,
            min_group_size: 15,
            players_per_cluster: 30,
            min_clusters: 3,
            max_clusters: 5,
            seed: 42,
            n_init: 20,
            max_iter: 500,
            tolerance: 1e-4,
            excluded_positions: vec![Position::Goalkeeper],
        }
    }
}

impl ArchetypeConfig {
    pub fn cluster_count(&self, group_size: usize) -> usize {
        (group_size / self.players_per_cluster.max(1))
            .clamp(self.min_clusters, self.max_clusters)
            .min(group_size)
    }
}

impl EngineConfig {
    /// Reads `.env`, an optional JSON file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(|s| PathBuf::from(s.trim())));
        let mut cfg = match path {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("read config {}", path.display()))?;
                serde_json::from_str::<EngineConfig>(&raw)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("SCOUT_DB_PATH") {
            self.warehouse.db_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("SCOUT_SOURCE_TABLE") {
            self.warehouse.source_table = v;
        }
        if let Some(v) = env_string("SCOUT_PARALLELISM").and_then(|v| v.parse::<usize>().ok()) {
            self.parallelism = v;
        }
        if let Some(v) = env_string("SCOUT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_string("SCOUT_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = env_string("SCOUT_WEIGHTS_PATH") {
            self.weights_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("SCOUT_RULES_PATH") {
            self.rules_path = Some(PathBuf::from(v));
        }
        self.parallelism = self.parallelism.clamp(1, 32);
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.similarity;
        if !(s.decay_lambda > 0.0 && s.decay_lambda < 1.0) {
            return Err(anyhow!("decay_lambda must be in (0, 1), got {}", s.decay_lambda));
        }
        if s.neighbors == 0 {
            return Err(anyhow!("similarity.neighbors must be positive"));
        }
        if s.search_k <= s.neighbors {
            return Err(anyhow!(
                "similarity.search_k ({}) must exceed neighbors ({}) to leave room for the origin",
                s.search_k,
                s.neighbors
            ));
        }
        if s.min_group_size < 2 {
            return Err(anyhow!("similarity.min_group_size must be at least 2"));
        }

        let p = &self.projection;
        if !(p.test_fraction > 0.0 && p.test_fraction < 1.0) {
            return Err(anyhow!("test_fraction must be in (0, 1), got {}", p.test_fraction));
        }
        if p.min_training_examples < 2 {
            return Err(anyhow!("projection.min_training_examples must be at least 2"));
        }
        if p.boosting.n_estimators == 0 || p.boosting.max_depth == 0 {
            return Err(anyhow!("boosting needs at least one estimator of depth >= 1"));
        }
        if !(p.boosting.learning_rate > 0.0 && p.boosting.learning_rate.is_finite()) {
            return Err(anyhow!("boosting.learning_rate must be positive"));
        }

        let a = &self.archetypes;
        if a.min_clusters == 0 || a.min_clusters > a.max_clusters {
            return Err(anyhow!(
                "archetype cluster bounds invalid: min={} max={}",
                a.min_clusters,
                a.max_clusters
            ));
        }
        if a.min_group_size < a.min_clusters {
            return Err(anyhow!(
                "archetypes.min_group_size ({}) below min_clusters ({})",
                a.min_group_size,
                a.min_clusters
            ));
        }
        if a.n_init == 0 || a.max_iter == 0 {
            return Err(anyhow!("k-means needs n_init and max_iter >= 1"));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// The configured weight table, or the built-in one.
    pub fn weight_table(&self) -> Result<WeightTable> {
        match &self.weights_path {
            Some(path) => WeightTable::load(path),
            None => Ok(WeightTable::default()),
        }
    }

    /// The configured archetype rule book, or the built-in one.
    pub fn rule_book(&self) -> Result<ArchetypeRuleBook> {
        match &self.rules_path {
            Some(path) => ArchetypeRuleBook::load(path),
            None => Ok(ArchetypeRuleBook::default()),
        }
    }
}

/// Value of a `--flag=value` or `--flag value` command-line option. A
/// following token that is itself an option is not taken as the value.
pub fn path_arg(args: &[String], flag: &str) -> Option<PathBuf> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(PathBuf::from(v.trim()));
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
            && !next.starts_with("--")
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn path_arg_reads_both_forms() {
        let a = args(&["--xlsx", "out.xlsx", "--db=runs/db.sqlite"]);
        assert_eq!(path_arg(&a, "--xlsx"), Some(PathBuf::from("out.xlsx")));
        assert_eq!(path_arg(&a, "--db"), Some(PathBuf::from("runs/db.sqlite")));
        assert_eq!(path_arg(&a, "--config"), None);
    }

    #[test]
    fn path_arg_does_not_swallow_the_next_flag() {
        let a = args(&["--xlsx", "--dry-run"]);
        assert_eq!(path_arg(&a, "--xlsx"), None);
        assert_eq!(path_arg(&args(&["--config="]), "--config"), None);
        assert_eq!(path_arg(&args(&["--write-defaults"]), "--write-defaults"), None);
    }

    #[test]
    fn defaults_validate() {
        EngineConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn cluster_count_is_clamped() {
        let cfg = ArchetypeConfig::default();
        assert_eq!(cfg.cluster_count(15), 3);
        assert_eq!(cfg.cluster_count(100), 3);
        assert_eq!(cfg.cluster_count(120), 4);
        assert_eq!(cfg.cluster_count(1000), 5);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let raw = r#"{ "similarity": { "decay_lambda": 0.9 }, "parallelism": 2 }"#;
        let cfg: EngineConfig = serde_json::from_str(raw).expect("config should parse");
        assert_eq!(cfg.similarity.decay_lambda, 0.9);
        assert_eq!(cfg.similarity.neighbors, 5);
        assert_eq!(cfg.parallelism, 2);
        assert_eq!(cfg.projection.boosting.n_estimators, 200);
        assert_eq!(cfg.archetypes.excluded_positions, vec![Position::Goalkeeper]);
    }

    #[test]
    fn validate_rejects_bad_lambda() {
        let mut cfg = EngineConfig::default();
        cfg.similarity.decay_lambda = 1.0;
        assert!(cfg.validate().is_err());
        cfg.similarity.decay_lambda = 0.95;
        cfg.similarity.search_k = 5;
        assert!(cfg.validate().is_err());
    }
}
