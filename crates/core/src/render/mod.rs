//! Market -> sector -> instrument treemap.

pub mod color;

use crate::domain::analysis::{AnalysisRow, MIN_AREA};
use crate::domain::metric::{MetricId, SizeBasis};
use crate::mapper::ResolvedVisual;
use color::ColorAxis;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub root_label: String,
    pub size_basis: SizeBasis,
    pub visual: ResolvedVisual,
    /// Metric printed under the instrument name; may differ from the color field.
    pub label_metric: MetricId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLevel {
    Market,
    Sector,
    Instrument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreemapNode {
    pub id: String,
    pub label: String,
    pub level: NodeLevel,
    /// Area. Interior nodes carry the sum of their children.
    pub value: f64,
    /// Leaves: the color field; interior nodes: area-weighted mean of children.
    pub color_value: f64,
    pub color: String,
    /// Label lines, top to bottom.
    pub text: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreemapNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderSpec {
    pub root: TreemapNode,
    pub size_basis: SizeBasis,
    pub color_metric: MetricId,
    pub label_metric: MetricId,
    pub color_axis: ColorAxis,
    pub leaf_count: usize,
}

/// Parallel arrays, one entry per node, parents before children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlatTreemap {
    pub ids: Vec<String>,
    pub labels: Vec<String>,
    pub parents: Vec<String>,
    pub values: Vec<f64>,
    pub colors: Vec<String>,
    pub texts: Vec<String>,
}

/// Build the treemap. Callers pass a non-empty, already-normalized row set.
pub fn render(rows: &[AnalysisRow], opts: &RenderOptions) -> RenderSpec {
    let field = opts.visual.value_field;
    let axis = ColorAxis::fit(
        opts.visual.color_scale,
        opts.visual.midpoint,
        rows.iter().map(|r| r.metric_value(field)),
    );

    // Sectors in order of first appearance, so catalog priority carries through.
    let mut sectors: Vec<(String, Vec<TreemapNode>)> = Vec::new();
    for row in rows {
        let sector_id = format!("{}/{}", opts.root_label, row.sector);
        let color_value = row.metric_value(field);
        let leaf = TreemapNode {
            id: format!("{sector_id}/{}", row.code),
            label: row.instrument.clone(),
            level: NodeLevel::Instrument,
            value: row.size_metric(opts.size_basis).max(MIN_AREA),
            color_value,
            color: axis.color(color_value).hex(),
            text: vec![row.instrument.clone(), row.display_value(opts.label_metric)],
            children: Vec::new(),
        };

        match sectors.iter_mut().find(|(name, _)| *name == row.sector) {
            Some((_, leaves)) => leaves.push(leaf),
            None => sectors.push((row.sector.clone(), vec![leaf])),
        }
    }

    let sector_nodes: Vec<TreemapNode> = sectors
        .into_iter()
        .map(|(name, leaves)| {
            interior(
                format!("{}/{}", opts.root_label, name),
                name,
                NodeLevel::Sector,
                leaves,
                &axis,
            )
        })
        .collect();

    let root = interior(
        opts.root_label.clone(),
        opts.root_label.clone(),
        NodeLevel::Market,
        sector_nodes,
        &axis,
    );

    RenderSpec {
        root,
        size_basis: opts.size_basis,
        color_metric: field,
        label_metric: opts.label_metric,
        color_axis: axis,
        leaf_count: rows.len(),
    }
}

fn interior(
    id: String,
    label: String,
    level: NodeLevel,
    children: Vec<TreemapNode>,
    axis: &ColorAxis,
) -> TreemapNode {
    let value: f64 = children.iter().map(|c| c.value).sum();
    let color_value = if value > 0.0 {
        children.iter().map(|c| c.color_value * c.value).sum::<f64>() / value
    } else {
        0.0
    };

    TreemapNode {
        id,
        text: vec![label.clone()],
        label,
        level,
        value,
        color_value,
        color: axis.color(color_value).hex(),
        children,
    }
}

impl RenderSpec {
    pub fn flatten(&self) -> FlatTreemap {
        let mut out = FlatTreemap::default();
        push_node(&mut out, &self.root, "");
        out
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TreemapNode> {
        self.root.children.iter().flat_map(|s| s.children.iter())
    }
}

fn push_node(out: &mut FlatTreemap, node: &TreemapNode, parent: &str) {
    out.ids.push(node.id.clone());
    out.labels.push(node.label.clone());
    out.parents.push(parent.to_string());
    out.values.push(node.value);
    out.colors.push(node.color.clone());
    out.texts.push(node.text.join("\n"));
    for child in &node.children {
        push_node(out, child, &node.id);
    }
}
