use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::pipeline::PipelineOutput;

pub struct ExportReport {
    pub edges: usize,
    pub projections: usize,
    pub archetypes: usize,
    pub assignments: usize,
}

enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        if v.is_finite() { Cell::Number(v) } else { Cell::Empty }
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map(Cell::from).unwrap_or(Cell::Empty)
    }
}

fn int(v: impl Into<i64>) -> Cell {
    Cell::Number(v.into() as f64)
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::from(*n)).collect()
}

/// Writes the four output relations and the run summary to one workbook.
pub fn export_workbook(path: &Path, out: &PipelineOutput) -> Result<ExportReport> {
    let mut edges_rows = vec![header(&[
        "Origin ID",
        "Origin",
        "Origin Season",
        "Target ID",
        "Target",
        "Target Season",
        "Position",
        "Rank",
        "Distance",
        "Decay",
        "Score",
        "Target Team",
        "Target Age",
        "Target Value",
    ])];
    for e in &out.edges {
        edges_rows.push(vec![
            e.origin_player_id.clone().into(),
            e.origin_name.clone().into(),
            int(e.origin_season),
            e.target_player_id.clone().into(),
            e.target_name.clone().into(),
            int(e.target_season),
            e.position.as_str().into(),
            int(e.rank),
            e.raw_distance.into(),
            e.decay_factor.into(),
            e.score.into(),
            e.target_team.clone().into(),
            e.target_age.into(),
            e.target_market_value.into(),
        ]);
    }

    let mut projection_rows = vec![header(&[
        "Player ID",
        "Player",
        "Season",
        "Position",
        "Team",
        "Age",
        "Current Value",
        "Projected Value",
        "Delta %",
    ])];
    for v in &out.projections {
        projection_rows.push(vec![
            v.player_id.clone().into(),
            v.name.clone().into(),
            int(v.season),
            v.position.as_str().into(),
            v.team.clone().into(),
            v.age.into(),
            v.current_value.into(),
            v.projected_value.into(),
            v.projected_delta_pct.into(),
        ]);
    }

    let mut archetype_rows = vec![header(&[
        "Cluster ID",
        "Position",
        "Local ID",
        "Label",
        "Members",
        "Offense",
        "Creation",
        "Defense",
        "Offense Share",
        "Creation Share",
        "Defense Share",
    ])];
    for a in &out.archetypes {
        archetype_rows.push(vec![
            Cell::Number(a.cluster_id as f64),
            a.position.as_str().into(),
            Cell::Number(a.local_id as f64),
            a.label.clone().into(),
            Cell::Number(a.members as f64),
            a.scores.offense.into(),
            a.scores.creation.into(),
            a.scores.defense.into(),
            a.scores.offense_share.into(),
            a.scores.creation_share.into(),
            a.scores.defense_share.into(),
        ]);
    }

    let mut assignment_rows = vec![header(&[
        "Player ID",
        "Player",
        "Season",
        "Position",
        "Team",
        "Cluster ID",
        "Archetype",
        "Rating",
        "Market Value",
    ])];
    for a in &out.assignments {
        assignment_rows.push(vec![
            a.player_id.clone().into(),
            a.name.clone().into(),
            int(a.season),
            a.position.as_str().into(),
            a.team.clone().into(),
            Cell::Number(a.cluster_id as f64),
            a.label.clone().into(),
            a.rating.into(),
            a.market_value.into(),
        ]);
    }

    let mut run_rows = vec![header(&["Stage", "Position", "Players", "Status", "Outputs", "Detail"])];
    for g in &out.groups {
        run_rows.push(vec![
            format!("{:?}", g.stage).into(),
            g.position.as_str().into(),
            Cell::Number(g.players as f64),
            format!("{:?}", g.status).into(),
            Cell::Number(g.outputs as f64),
            g.detail.clone().map(Cell::from).unwrap_or(Cell::Empty),
        ]);
    }
    run_rows.push(vec![
        "Projection".into(),
        Cell::Empty,
        Cell::Number(out.projection.transitions as f64),
        format!("train_r2={:.4} test_r2={:.4}", out.projection.train_r2, out.projection.test_r2)
            .into(),
        Cell::Number(out.projection.projected as f64),
        out.run_id.clone().into(),
    ]);

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Similarity")?;
        write_rows(sheet, &edges_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Projections")?;
        write_rows(sheet, &projection_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Archetypes")?;
        write_rows(sheet, &archetype_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Assignments")?;
        write_rows(sheet, &assignment_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Run")?;
        write_rows(sheet, &run_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    tracing::info!(path = %path.display(), "workbook exported");

    Ok(ExportReport {
        edges: edges_rows.len().saturating_sub(1),
        projections: projection_rows.len().saturating_sub(1),
        archetypes: archetype_rows.len().saturating_sub(1),
        assignments: assignment_rows.len().saturating_sub(1),
    })
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<Cell>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            let written = match value {
                Cell::Text(s) => worksheet.write_string(r, c, s),
                Cell::Number(n) => worksheet.write_number(r, c, *n),
                Cell::Empty => continue,
            };
            written.with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
