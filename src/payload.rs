//! Boundary parsing for backend chart payloads.
//!
//! The backend answers `chart-data` with a shape that depends on the chart
//! kind, on whether `group_by` was set, and on the column dtype. Each
//! accepted shape gets its own variant here, so normalization is a single
//! exhaustive match instead of ad hoc field probing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cell::{CellValue, Row, cell_display, cell_number};
use crate::chart::ChartKind;

/// One scatter series as the backend sends it.
///
/// `x` stays raw: the backend sends whatever the x column holds, which may
/// be categories rather than numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    pub name: String,
    pub x: Vec<CellValue>,
    pub y: Vec<Option<f64>>,
    pub size: Option<Vec<Option<f64>>>,
}

/// Heatmap grid: column labels, row labels and a row-major value matrix.
///
/// Cells are coerced to numbers on parse, labels to display strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeatmapGrid {
    pub x: Vec<String>,
    pub y: Vec<String>,
    pub z: Vec<Vec<Option<f64>>>,
}

/// A chart payload, classified by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ChartPayload {
    /// `{x: labels, y: {series: values, ...}}`
    Columns {
        labels: Vec<String>,
        series: Vec<(String, Vec<Option<f64>>)>,
    },
    /// `[{col: value, ...}, ...]`
    Records(Vec<Row>),
    /// `{group: [{col: value, ...}, ...], ...}` produced when `group_by` is set
    GroupedRecords(Vec<(String, Vec<Row>)>),
    /// `{labels: [...], values: [...]}`
    Slices {
        labels: Vec<String>,
        values: Vec<Option<f64>>,
    },
    /// `{data: counts, bins: edges}`
    Bins {
        counts: Vec<Option<f64>>,
        edges: Vec<f64>,
    },
    /// `{data: [{name, x, y, size?}, ...]}`
    Points(Vec<PointSeries>),
    /// `{x: colLabels, y: rowLabels, z: matrix}`
    Grid(HeatmapGrid),
    /// Anything a kind does not accept.
    Unrecognized,
}

impl ChartPayload {
    /// Classifies `raw` against the shapes `kind` accepts. Never fails; a
    /// payload matching nothing becomes `Unrecognized`.
    pub fn parse(kind: ChartKind, raw: &Value) -> ChartPayload {
        let parsed = match kind {
            ChartKind::Bar | ChartKind::Line => parse_columns(raw)
                .or_else(|| parse_records(raw))
                .or_else(|| parse_grouped_records(raw)),
            ChartKind::Pie | ChartKind::Doughnut => parse_slices(raw),
            ChartKind::Histogram => parse_bins(raw).or_else(|| parse_slices(raw)),
            ChartKind::Scatter => parse_points(raw),
            ChartKind::Heatmap => parse_grid(raw),
        };
        parsed.unwrap_or(ChartPayload::Unrecognized)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ChartPayload::Unrecognized)
    }
}

fn labels(value: &Value) -> Option<Vec<String>> {
    value.as_array().map(|items| items.iter().map(cell_display).collect())
}

fn numbers(value: &Value) -> Option<Vec<Option<f64>>> {
    value.as_array().map(|items| items.iter().map(cell_number).collect())
}

fn records(value: &Value) -> Option<Vec<Row>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| item.as_object().cloned())
        .collect::<Option<Vec<Map<String, Value>>>>()
}

fn parse_columns(raw: &Value) -> Option<ChartPayload> {
    let obj = raw.as_object()?;
    let labels = labels(obj.get("x")?)?;
    let y = obj.get("y")?.as_object()?;
    let series = y
        .iter()
        .map(|(name, values)| numbers(values).map(|v| (name.clone(), v)))
        .collect::<Option<Vec<_>>>()?;
    Some(ChartPayload::Columns { labels, series })
}

fn parse_records(raw: &Value) -> Option<ChartPayload> {
    records(raw).map(ChartPayload::Records)
}

fn parse_grouped_records(raw: &Value) -> Option<ChartPayload> {
    let obj = raw.as_object()?;
    if obj.is_empty() {
        return None;
    }
    let groups = obj
        .iter()
        .map(|(group, rows)| records(rows).map(|r| (group.clone(), r)))
        .collect::<Option<Vec<_>>>()?;
    Some(ChartPayload::GroupedRecords(groups))
}

fn parse_slices(raw: &Value) -> Option<ChartPayload> {
    let obj = raw.as_object()?;
    Some(ChartPayload::Slices {
        labels: labels(obj.get("labels")?)?,
        values: numbers(obj.get("values")?)?,
    })
}

fn parse_bins(raw: &Value) -> Option<ChartPayload> {
    let obj = raw.as_object()?;
    let counts = numbers(obj.get("data")?)?;
    let edges = obj
        .get("bins")?
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()?;
    Some(ChartPayload::Bins { counts, edges })
}

fn parse_points(raw: &Value) -> Option<ChartPayload> {
    let data = raw.as_object()?.get("data")?.as_array()?;
    let series = data
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item.as_object()?;
            let name = obj
                .get("name")
                .map(cell_display)
                .unwrap_or_else(|| format!("Series {}", i + 1));
            let size = match obj.get("size") {
                Some(Value::Null) | None => None,
                Some(v) => Some(numbers(v)?),
            };
            Some(PointSeries {
                name,
                x: obj.get("x")?.as_array()?.clone(),
                y: numbers(obj.get("y")?)?,
                size,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    Some(ChartPayload::Points(series))
}

fn parse_grid(raw: &Value) -> Option<ChartPayload> {
    let obj = raw.as_object()?;
    let z = obj
        .get("z")?
        .as_array()?
        .iter()
        .map(numbers)
        .collect::<Option<Vec<_>>>()?;
    Some(ChartPayload::Grid(HeatmapGrid {
        x: labels(obj.get("x")?)?,
        y: labels(obj.get("y")?)?,
        z,
    }))
}
