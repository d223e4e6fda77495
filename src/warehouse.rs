use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Row, RowAccessor};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ErrorCode, params, params_from_iter};

use crate::config::WarehouseConfig;
use crate::pipeline::PipelineOutput;
use crate::profile::{PlayerSeasonProfile, Position, Stat};

pub const REQUIRED_COLUMNS: [&str; 3] = ["player_id", "season", "position"];

const DESCRIPTIVE_COLUMNS: [&str; 6] = [
    "player",
    "team",
    "age",
    "market_value",
    "minutes_played",
    "matches_played",
];

pub const OUTPUT_TABLES: [&str; 4] = [
    "similarity_edges",
    "value_projections",
    "archetypes",
    "archetype_assignments",
];

/// Every column the loader understands, in select order.
pub fn source_columns() -> Vec<&'static str> {
    let mut cols = REQUIRED_COLUMNS.to_vec();
    cols.extend(DESCRIPTIVE_COLUMNS);
    cols.extend(Stat::ALL.iter().map(|s| s.column()));
    cols.extend(Stat::ALL.iter().map(|s| s.percentile_column()));
    cols
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub edges: usize,
    pub projections: usize,
    pub archetypes: usize,
    pub assignments: usize,
}

/// Why a source row did not become a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RowSkip {
    MissingId,
    MissingSeason,
    UnknownPosition(String),
}

/// Named column access over one input row, whatever the storage.
trait ColumnSource {
    fn text(&self, column: &str) -> Option<String>;
    fn number(&self, column: &str) -> Option<f64>;
}

struct SqlRow<'r, 's> {
    row: &'r rusqlite::Row<'s>,
    index: &'r HashMap<&'static str, usize>,
}

impl ColumnSource for SqlRow<'_, '_> {
    fn text(&self, column: &str) -> Option<String> {
        let idx = *self.index.get(column)?;
        match self.row.get_ref(idx).ok()? {
            ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().map(str::to_string),
            ValueRef::Integer(v) => Some(v.to_string()),
            ValueRef::Real(v) => Some(v.to_string()),
            ValueRef::Null | ValueRef::Blob(_) => None,
        }
    }

    fn number(&self, column: &str) -> Option<f64> {
        let idx = *self.index.get(column)?;
        match self.row.get_ref(idx).ok()? {
            ValueRef::Integer(v) => Some(v as f64),
            ValueRef::Real(v) => Some(v),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            ValueRef::Null | ValueRef::Blob(_) => None,
        }
    }
}

struct ParquetRow<'r> {
    row: &'r Row,
    index: &'r HashMap<String, usize>,
}

impl ColumnSource for ParquetRow<'_> {
    fn text(&self, column: &str) -> Option<String> {
        let idx = *self.index.get(column)?;
        if let Ok(v) = self.row.get_string(idx) {
            return Some(v.clone());
        }
        if let Ok(v) = self.row.get_long(idx) {
            return Some(v.to_string());
        }
        self.row.get_int(idx).ok().map(|v| v.to_string())
    }

    fn number(&self, column: &str) -> Option<f64> {
        let idx = *self.index.get(column)?;
        if let Ok(v) = self.row.get_double(idx) {
            return Some(v);
        }
        if let Ok(v) = self.row.get_float(idx) {
            return Some(v as f64);
        }
        if let Ok(v) = self.row.get_long(idx) {
            return Some(v as f64);
        }
        if let Ok(v) = self.row.get_int(idx) {
            return Some(v as f64);
        }
        self.row.get_string(idx).ok()?.trim().parse().ok()
    }
}

fn parse_season(src: &impl ColumnSource) -> Option<i32> {
    if let Some(v) = src.number("season").filter(|v| v.is_finite()) {
        return Some(v as i32);
    }
    // "2023/2024" and "2023-24" style labels key on the first year.
    let raw = src.text("season")?;
    let head = raw.trim().split(['/', '-']).next()?.trim();
    head.parse().ok()
}

fn profile_from(src: &impl ColumnSource) -> std::result::Result<PlayerSeasonProfile, RowSkip> {
    let player_id = src
        .text("player_id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(RowSkip::MissingId)?;
    let season = parse_season(src).ok_or(RowSkip::MissingSeason)?;
    let raw_position = src.text("position").unwrap_or_default();
    let position =
        Position::parse(&raw_position).ok_or(RowSkip::UnknownPosition(raw_position))?;

    let mut p = PlayerSeasonProfile::new(player_id, season, position);
    p.name = src.text("player").unwrap_or_default();
    p.team = src.text("team").unwrap_or_default();
    p.age = src.number("age");
    p.market_value = src.number("market_value");
    p.minutes_played = src.number("minutes_played").unwrap_or(0.0);
    p.matches_played = src
        .number("matches_played")
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u32)
        .unwrap_or(0);
    for stat in Stat::ALL {
        p.stats[stat.index()] = src.number(stat.column());
        p.percentiles[stat.index()] = src.number(stat.percentile_column());
    }
    Ok(p)
}

/// Drops unusable rows and keeps the most-minutes row per
/// (player, season, position). Output is sorted by that key.
fn finish_load(
    rows: Vec<std::result::Result<PlayerSeasonProfile, RowSkip>>,
    source: &str,
) -> Vec<PlayerSeasonProfile> {
    let read = rows.len();
    let mut missing_id = 0usize;
    let mut missing_season = 0usize;
    let mut unknown_positions: BTreeMap<String, usize> = BTreeMap::new();
    let mut duplicates = 0usize;
    let mut kept: BTreeMap<(String, i32, Position), PlayerSeasonProfile> = BTreeMap::new();

    for row in rows {
        let p = match row {
            Ok(p) => p,
            Err(RowSkip::MissingId) => {
                missing_id += 1;
                continue;
            }
            Err(RowSkip::MissingSeason) => {
                missing_season += 1;
                continue;
            }
            Err(RowSkip::UnknownPosition(label)) => {
                *unknown_positions.entry(label).or_default() += 1;
                continue;
            }
        };
        let key = (p.player_id.clone(), p.season, p.position);
        match kept.get_mut(&key) {
            Some(cur) => {
                duplicates += 1;
                if p.minutes_played > cur.minutes_played {
                    *cur = p;
                }
            }
            None => {
                kept.insert(key, p);
            }
        }
    }

    let unknown: usize = unknown_positions.values().sum();
    if unknown > 0 {
        tracing::warn!(
            source,
            rows = unknown,
            labels = ?unknown_positions.keys().collect::<Vec<_>>(),
            "skipped rows with unknown position"
        );
    }
    if missing_id + missing_season > 0 {
        tracing::warn!(source, missing_id, missing_season, "skipped rows without identity");
    }
    if duplicates > 0 {
        tracing::warn!(source, duplicates, "dropped duplicate player-season-position rows");
    }
    tracing::info!(source, read, loaded = kept.len(), "profiles loaded");
    kept.into_values().collect()
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Runs `op` up to `attempts` times, sleeping `backoff_ms * attempt` after
/// each busy/locked failure. Other errors return immediately.
fn with_retry<T>(
    attempts: u32,
    backoff_ms: u64,
    what: &str,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut last_err: Option<rusqlite::Error> = None;
    for attempt in 1..=attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(err) if is_transient(&err) && attempt < attempts => {
                tracing::warn!(what, attempt, error = %err, "sqlite busy, retrying");
                let sleep_ms = backoff_ms.saturating_mul(attempt as u64);
                std::thread::sleep(Duration::from_millis(sleep_ms));
                last_err = Some(err);
            }
            Err(err) => return Err(err).with_context(|| what.to_string()),
        }
    }
    match last_err {
        Some(err) => Err(err).with_context(|| what.to_string()),
        None => Err(anyhow!("{what} failed")),
    }
}

pub fn init_output_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS similarity_edges (
            run_id TEXT NOT NULL,
            origin_player_id TEXT NOT NULL,
            origin_name TEXT NOT NULL,
            origin_season INTEGER NOT NULL,
            target_player_id TEXT NOT NULL,
            target_name TEXT NOT NULL,
            target_season INTEGER NOT NULL,
            position TEXT NOT NULL,
            rank INTEGER NOT NULL,
            raw_distance REAL NOT NULL,
            decay_factor REAL NOT NULL,
            score REAL NOT NULL,
            target_team TEXT NOT NULL,
            target_age REAL NULL,
            target_market_value REAL NULL
        );
        CREATE INDEX IF NOT EXISTS idx_edges_origin
            ON similarity_edges(origin_player_id, origin_season);

        CREATE TABLE IF NOT EXISTS value_projections (
            run_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            name TEXT NOT NULL,
            season INTEGER NOT NULL,
            position TEXT NOT NULL,
            team TEXT NOT NULL,
            age REAL NOT NULL,
            current_value REAL NOT NULL,
            projected_value REAL NOT NULL,
            projected_delta_pct REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS archetypes (
            run_id TEXT NOT NULL,
            cluster_id INTEGER NOT NULL,
            position TEXT NOT NULL,
            local_id INTEGER NOT NULL,
            label TEXT NOT NULL,
            members INTEGER NOT NULL,
            offense REAL NOT NULL,
            creation REAL NOT NULL,
            defense REAL NOT NULL,
            offense_share REAL NOT NULL,
            creation_share REAL NOT NULL,
            defense_share REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS archetype_assignments (
            run_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            name TEXT NOT NULL,
            season INTEGER NOT NULL,
            position TEXT NOT NULL,
            team TEXT NOT NULL,
            cluster_id INTEGER NOT NULL,
            label TEXT NOT NULL,
            rating REAL NULL,
            market_value REAL NULL
        );

        CREATE TABLE IF NOT EXISTS model_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            profiles INTEGER NOT NULL,
            edges INTEGER NOT NULL,
            projections INTEGER NOT NULL,
            archetypes INTEGER NOT NULL,
            assignments INTEGER NOT NULL,
            failed_groups INTEGER NOT NULL,
            summary_json TEXT NOT NULL
        );
        "#,
    )
    .context("create output schema")?;
    Ok(())
}

fn publish_tx(
    conn: &mut Connection,
    out: &PipelineOutput,
    summary_json: &str,
) -> rusqlite::Result<PublishSummary> {
    let tx = conn.transaction()?;
    for table in OUTPUT_TABLES {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO similarity_edges(
                run_id, origin_player_id, origin_name, origin_season,
                target_player_id, target_name, target_season, position, rank,
                raw_distance, decay_factor, score, target_team, target_age, target_market_value
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;
        for e in &out.edges {
            stmt.execute(params![
                out.run_id,
                e.origin_player_id,
                e.origin_name,
                e.origin_season,
                e.target_player_id,
                e.target_name,
                e.target_season,
                e.position.as_str(),
                e.rank,
                e.raw_distance,
                e.decay_factor,
                e.score,
                e.target_team,
                e.target_age,
                e.target_market_value,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO value_projections(
                run_id, player_id, name, season, position, team, age,
                current_value, projected_value, projected_delta_pct
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for v in &out.projections {
            stmt.execute(params![
                out.run_id,
                v.player_id,
                v.name,
                v.season,
                v.position.as_str(),
                v.team,
                v.age,
                v.current_value,
                v.projected_value,
                v.projected_delta_pct,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO archetypes(
                run_id, cluster_id, position, local_id, label, members,
                offense, creation, defense, offense_share, creation_share, defense_share
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for a in &out.archetypes {
            stmt.execute(params![
                out.run_id,
                a.cluster_id as i64,
                a.position.as_str(),
                a.local_id as i64,
                a.label,
                a.members as i64,
                a.scores.offense,
                a.scores.creation,
                a.scores.defense,
                a.scores.offense_share,
                a.scores.creation_share,
                a.scores.defense_share,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO archetype_assignments(
                run_id, player_id, name, season, position, team, cluster_id, label,
                rating, market_value
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for a in &out.assignments {
            stmt.execute(params![
                out.run_id,
                a.player_id,
                a.name,
                a.season,
                a.position.as_str(),
                a.team,
                a.cluster_id as i64,
                a.label,
                a.rating,
                a.market_value,
            ])?;
        }
    }

    tx.execute(
        "INSERT OR REPLACE INTO model_runs(
            run_id, started_at, finished_at, profiles, edges, projections,
            archetypes, assignments, failed_groups, summary_json
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            out.run_id,
            out.started_at,
            out.finished_at,
            out.profiles as i64,
            out.edges.len() as i64,
            out.projections.len() as i64,
            out.archetypes.len() as i64,
            out.assignments.len() as i64,
            out.failures().count() as i64,
            summary_json,
        ],
    )?;

    tx.commit()?;
    Ok(PublishSummary {
        edges: out.edges.len(),
        projections: out.projections.len(),
        archetypes: out.archetypes.len(),
        assignments: out.assignments.len(),
    })
}

pub struct Warehouse {
    conn: Connection,
    cfg: WarehouseConfig,
}

impl Warehouse {
    pub fn open(cfg: &WarehouseConfig) -> Result<Self> {
        if let Some(parent) = cfg.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(&cfg.db_path)
            .with_context(|| format!("open sqlite db {}", cfg.db_path.display()))?;
        Self::from_connection(conn, cfg)
    }

    pub fn from_connection(conn: Connection, cfg: &WarehouseConfig) -> Result<Self> {
        if !valid_identifier(&cfg.source_table) {
            return Err(anyhow!("invalid source table name {:?}", cfg.source_table));
        }
        conn.busy_timeout(Duration::from_millis(cfg.retry_backoff_ms))
            .context("set sqlite busy timeout")?;
        init_output_schema(&conn)?;
        Ok(Self {
            conn,
            cfg: cfg.clone(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn source_table_columns(&self) -> Result<HashSet<String>> {
        let table = &self.cfg.source_table;
        with_retry(
            self.cfg.retry_attempts,
            self.cfg.retry_backoff_ms,
            "read source table schema",
            || {
                let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
                let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
                names.collect::<rusqlite::Result<HashSet<_>>>()
            },
        )
    }

    pub fn load_profiles(&self) -> Result<Vec<PlayerSeasonProfile>> {
        let table = &self.cfg.source_table;
        let present = self.source_table_columns()?;
        if present.is_empty() {
            return Err(anyhow!("source table {table} not found"));
        }
        if let Some(col) = REQUIRED_COLUMNS.iter().find(|c| !present.contains(**c)) {
            return Err(anyhow!("source table {table} lacks required column {col}"));
        }

        let (columns, absent): (Vec<&'static str>, Vec<&'static str>) = source_columns()
            .into_iter()
            .partition(|c| present.contains(*c));
        if !absent.is_empty() {
            tracing::warn!(table = %table, columns = ?absent, "source columns missing, read as null");
        }
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, i))
            .collect::<HashMap<_, _>>();
        let sql = format!("SELECT {} FROM {table}", columns.join(", "));

        let rows = with_retry(
            self.cfg.retry_attempts,
            self.cfg.retry_backoff_ms,
            "read source rows",
            || {
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok(profile_from(&SqlRow { row, index: &index }))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            },
        )?;
        Ok(finish_load(rows, table))
    }

    /// Creates the source table if needed and appends `profiles` to it.
    pub fn write_profiles(&mut self, profiles: &[PlayerSeasonProfile]) -> Result<usize> {
        let table = self.cfg.source_table.clone();
        let columns = source_columns();
        let defs = columns
            .iter()
            .map(|c| match *c {
                "player_id" | "player" | "position" | "team" => format!("{c} TEXT"),
                "season" | "matches_played" => format!("{c} INTEGER"),
                _ => format!("{c} REAL"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!("CREATE TABLE IF NOT EXISTS {table} ({defs})");
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let real = |v: Option<f64>| v.map(Value::Real).unwrap_or(Value::Null);
        with_retry(
            self.cfg.retry_attempts,
            self.cfg.retry_backoff_ms,
            "write source profiles",
            || {
                let tx = self.conn.transaction()?;
                tx.execute(&create, [])?;
                {
                    let mut stmt = tx.prepare(&insert)?;
                    for p in profiles {
                        let mut values = vec![
                            Value::Text(p.player_id.clone()),
                            Value::Integer(p.season as i64),
                            Value::Text(p.position.as_str().to_string()),
                            Value::Text(p.name.clone()),
                            Value::Text(p.team.clone()),
                            real(p.age),
                            real(p.market_value),
                            Value::Real(p.minutes_played),
                            Value::Integer(p.matches_played as i64),
                        ];
                        values.extend(p.stats.iter().map(|v| real(*v)));
                        values.extend(p.percentiles.iter().map(|v| real(*v)));
                        stmt.execute(params_from_iter(values))?;
                    }
                }
                tx.commit()?;
                Ok(profiles.len())
            },
        )
    }

    /// Replaces every output relation with `out` and records the run, in
    /// one transaction.
    pub fn publish(&mut self, out: &PipelineOutput) -> Result<PublishSummary> {
        let summary_json = out.summary_json()?;
        let conn = &mut self.conn;
        let summary = with_retry(
            self.cfg.retry_attempts,
            self.cfg.retry_backoff_ms,
            "publish outputs",
            || publish_tx(conn, out, &summary_json),
        )?;
        tracing::info!(
            run_id = %out.run_id,
            edges = summary.edges,
            projections = summary.projections,
            archetypes = summary.archetypes,
            assignments = summary.assignments,
            "outputs published"
        );
        Ok(summary)
    }
}

pub fn load_parquet_profiles(path: &Path) -> Result<Vec<PlayerSeasonProfile>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader profiles")?;
    let index = reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name().to_string(), i))
        .collect::<HashMap<_, _>>();
    if let Some(col) = REQUIRED_COLUMNS.iter().find(|c| !index.contains_key(**c)) {
        return Err(anyhow!("{} lacks required column {col}", path.display()));
    }

    let iter = reader.get_row_iter(None).context("iterate profile rows")?;
    let mut rows = Vec::new();
    for row in iter {
        let row = row.context("decode parquet profile row")?;
        rows.push(profile_from(&ParquetRow {
            row: &row,
            index: &index,
        }));
    }
    Ok(finish_load(rows, &path.display().to_string()))
}
