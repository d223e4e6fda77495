use std::panic::{self, AssertUnwindSafe};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;

use crate::archetypes::{
    Archetype, ArchetypeAssignment, ArchetypeRuleBook, GroupClusters, archetype_groups,
    assign_global_ids, cluster_group,
};
use crate::config::EngineConfig;
use crate::profile::{PlayerSeasonProfile, Position};
use crate::projection::{ProjectionReport, ValueProjection, project_values};
use crate::similarity::{SimilarityEdge, edges_for_group, position_groups};
use crate::weights::WeightTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Similarity,
    Archetypes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub stage: Stage,
    pub position: Position,
    pub players: usize,
    pub status: GroupStatus,
    pub outputs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub profiles: usize,
    pub edges: Vec<SimilarityEdge>,
    pub projections: Vec<ValueProjection>,
    pub projection: ProjectionReport,
    pub archetypes: Vec<Archetype>,
    pub assignments: Vec<ArchetypeAssignment>,
    pub groups: Vec<GroupReport>,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    projection: &'a ProjectionReport,
    groups: &'a [GroupReport],
}

impl PipelineOutput {
    pub fn failures(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups
            .iter()
            .filter(|g| g.status == GroupStatus::Failed)
    }

    pub fn summary_json(&self) -> Result<String> {
        serde_json::to_string(&RunSummary {
            projection: &self.projection,
            groups: &self.groups,
        })
        .context("serialize run summary")
    }
}

fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.clamp(1, 32))
        .thread_name(|i| format!("scout-{i}"))
        .build()
        .ok()
}

fn with_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}

/// Runs one group's work; a panic inside it comes back as an error.
fn guarded<T>(position: Position, work: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(anyhow!("{position} group panicked: {message}"))
        }
    }
}

fn report(
    stage: Stage,
    position: Position,
    players: usize,
    status: GroupStatus,
    outputs: usize,
    detail: Option<String>,
) -> GroupReport {
    GroupReport {
        stage,
        position,
        players,
        status,
        outputs,
        detail,
    }
}

fn run_similarity(
    profiles: &[PlayerSeasonProfile],
    cfg: &EngineConfig,
    weights: &WeightTable,
) -> (Vec<SimilarityEdge>, Vec<GroupReport>) {
    let scfg = &cfg.similarity;
    let results = position_groups(profiles, scfg)
        .into_par_iter()
        .map(|(position, members)| {
            let players = members.len();
            if players < scfg.min_group_size {
                tracing::warn!(
                    %position,
                    players,
                    min = scfg.min_group_size,
                    "similarity group too small, skipped"
                );
                let r = report(Stage::Similarity, position, players, GroupStatus::Skipped, 0, None);
                return (Vec::new(), r);
            }
            match guarded(position, || edges_for_group(position, &members, scfg, weights)) {
                Ok(edges) => {
                    let n = edges.len();
                    (edges, report(Stage::Similarity, position, players, GroupStatus::Done, n, None))
                }
                Err(err) => {
                    tracing::error!(%position, error = %format!("{err:#}"), "similarity group failed");
                    let detail = Some(format!("{err:#}"));
                    (
                        Vec::new(),
                        report(Stage::Similarity, position, players, GroupStatus::Failed, 0, detail),
                    )
                }
            }
        })
        .collect::<Vec<_>>();

    let mut edges = Vec::new();
    let mut reports = Vec::new();
    for (group_edges, r) in results {
        edges.extend(group_edges);
        reports.push(r);
    }
    edges.sort_by(|a, b| {
        a.origin_player_id
            .cmp(&b.origin_player_id)
            .then(a.origin_season.cmp(&b.origin_season))
            .then(a.position.cmp(&b.position))
            .then(a.rank.cmp(&b.rank))
    });
    (edges, reports)
}

fn run_archetypes(
    profiles: &[PlayerSeasonProfile],
    cfg: &EngineConfig,
    rules: &ArchetypeRuleBook,
) -> (Vec<Archetype>, Vec<ArchetypeAssignment>, Vec<GroupReport>) {
    let acfg = &cfg.archetypes;
    let results = archetype_groups(profiles, acfg)
        .into_par_iter()
        .map(|(position, members)| {
            let players = members.len();
            if players < acfg.min_group_size {
                tracing::warn!(
                    %position,
                    players,
                    min = acfg.min_group_size,
                    "archetype group too small, skipped"
                );
                let r = report(Stage::Archetypes, position, players, GroupStatus::Skipped, 0, None);
                return (None, r);
            }
            match guarded(position, || cluster_group(position, &members, acfg, rules)) {
                Ok(group) => {
                    let n = group.assignments.len();
                    let r = report(Stage::Archetypes, position, players, GroupStatus::Done, n, None);
                    (Some(group), r)
                }
                Err(err) => {
                    tracing::error!(%position, error = %format!("{err:#}"), "archetype group failed");
                    let detail = Some(format!("{err:#}"));
                    let r =
                        report(Stage::Archetypes, position, players, GroupStatus::Failed, 0, detail);
                    (None, r)
                }
            }
        })
        .collect::<Vec<_>>();

    let mut groups: Vec<GroupClusters> = Vec::new();
    let mut reports = Vec::new();
    for (group, r) in results {
        groups.extend(group);
        reports.push(r);
    }
    let (archetypes, assignments) = assign_global_ids(groups);
    (archetypes, assignments, reports)
}

/// Runs similarity, projection and archetype clustering over one snapshot.
/// Group failures are recorded in the output; a projection failure fails
/// the run.
pub fn run_pipeline(
    profiles: &[PlayerSeasonProfile],
    cfg: &EngineConfig,
    weights: &WeightTable,
    rules: &ArchetypeRuleBook,
) -> Result<PipelineOutput> {
    let now = Utc::now();
    let started_at = now.to_rfc3339();
    let run_id = format!("run-{}", now.format("%Y%m%dT%H%M%S%.3fZ"));
    tracing::info!(%run_id, profiles = profiles.len(), threads = cfg.parallelism, "pipeline start");

    let pool = build_pool(cfg.parallelism);
    let ((edges, sim_reports), (projected, (archetypes, assignments, arch_reports))) =
        with_pool(&pool, || {
            rayon::join(
                || run_similarity(profiles, cfg, weights),
                || {
                    rayon::join(
                        || project_values(profiles, &cfg.projection),
                        || run_archetypes(profiles, cfg, rules),
                    )
                },
            )
        });
    let (projections, projection) = projected.context("value projection")?;

    let mut groups = sim_reports;
    groups.extend(arch_reports);
    let out = PipelineOutput {
        run_id,
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        profiles: profiles.len(),
        edges,
        projections,
        projection,
        archetypes,
        assignments,
        groups,
    };
    let failed = out.failures().count();
    if failed > 0 {
        tracing::warn!(run_id = %out.run_id, failed, "pipeline finished with failed groups");
    }
    tracing::info!(
        run_id = %out.run_id,
        edges = out.edges.len(),
        projections = out.projections.len(),
        archetypes = out.archetypes.len(),
        assignments = out.assignments.len(),
        "pipeline done"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_turns_panics_into_errors() {
        let err = guarded::<()>(Position::Defender, || panic!("scaler blew up"))
            .expect_err("panic should surface as an error");
        let msg = format!("{err:#}");
        assert!(msg.contains("defender"), "{msg}");
        assert!(msg.contains("scaler blew up"), "{msg}");

        let formatted = guarded::<()>(Position::Forward, || panic!("bad row {}", 7))
            .expect_err("formatted panic");
        assert!(format!("{formatted:#}").contains("bad row 7"));
    }

    #[test]
    fn guarded_passes_results_through() {
        assert_eq!(guarded(Position::Forward, || Ok(3)).ok(), Some(3));
        let err = guarded::<()>(Position::Forward, || Err(anyhow!("plain failure")))
            .expect_err("error");
        assert_eq!(err.to_string(), "plain failure");
    }
}
