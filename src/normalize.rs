//! Chart normalization: backend payload in, render-ready model out.
//!
//! Normalization is pure. Colors and point sizes depend only on series and
//! label order, so the same input always produces the same encoding.

use log::{debug, warn};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::cell::{Row, cell_display, cell_number};
use crate::chart::{ChartKind, ChartRequest};
use crate::payload::{ChartPayload, HeatmapGrid, PointSeries};

/// Name of the single series a histogram produces.
pub const HISTOGRAM_SERIES: &str = "Frequency";

/// Name of the series returned when a payload cannot be drawn.
pub const PLACEHOLDER_SERIES: &str = "No data";

/// Decimal places used for synthesized histogram bin labels.
pub const BIN_LABEL_PRECISION: usize = 1;

pub const DEFAULT_POINT_RADIUS: f64 = 5.0;
pub const MIN_POINT_RADIUS: f64 = 3.0;
pub const MAX_POINT_RADIUS: f64 = 20.0;

/// An opaque RGB color. Serialises as `#rrggbb`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// CSS `rgba(...)` form, for translucent fills.
    pub fn rgba(&self, alpha: f64) -> String {
        format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, alpha.clamp(0.0, 1.0))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

/// Fixed palette; assignments wrap around past the end.
pub const PALETTE: [Color; 10] = [
    Color::rgb(54, 162, 235),
    Color::rgb(255, 99, 132),
    Color::rgb(75, 192, 192),
    Color::rgb(255, 159, 64),
    Color::rgb(153, 102, 255),
    Color::rgb(255, 205, 86),
    Color::rgb(201, 203, 207),
    Color::rgb(46, 204, 113),
    Color::rgb(231, 76, 60),
    Color::rgb(52, 73, 94),
];

pub fn palette_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

/// One drawable scatter point. On a categorical axis `x` is the index of
/// the category in the model's labels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SeriesValues {
    /// One value per label; `None` is a gap.
    Scalars(Vec<Option<f64>>),
    Points(Vec<Point>),
}

impl SeriesValues {
    pub fn len(&self) -> usize {
        match self {
            SeriesValues::Scalars(v) => v.len(),
            SeriesValues::Points(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderHints {
    /// Series color (line stroke, bar fill, point fill)
    pub color: Color,
    /// Per-label colors for pie and doughnut slices
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slice_colors: Vec<Color>,
}

impl RenderHints {
    fn indexed(index: usize) -> Self {
        RenderHints {
            color: palette_color(index),
            slice_colors: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: SeriesValues,
    pub hints: RenderHints,
}

impl Series {
    pub fn scalars(&self) -> Option<&[Option<f64>]> {
        match &self.values {
            SeriesValues::Scalars(v) => Some(v),
            SeriesValues::Points(_) => None,
        }
    }

    pub fn points(&self) -> Option<&[Point]> {
        match &self.values {
            SeriesValues::Points(p) => Some(p),
            SeriesValues::Scalars(_) => None,
        }
    }
}

/// Labels plus series, shared by every kind except heatmap.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeriesModel {
    pub kind: ChartKind,
    /// Category labels; `None` for point clouds on a numeric x axis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    pub series: Vec<Series>,
}

impl SeriesModel {
    /// The explicit "nothing to draw" model.
    pub fn placeholder(kind: ChartKind) -> Self {
        let values = if kind.is_point_cloud() {
            SeriesValues::Points(Vec::new())
        } else {
            SeriesValues::Scalars(Vec::new())
        };
        SeriesModel {
            kind,
            labels: (!kind.is_point_cloud()).then(Vec::new),
            series: vec![Series {
                name: PLACEHOLDER_SERIES.to_string(),
                values,
                hints: RenderHints::indexed(0),
            }],
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.series.as_slice(), [only] if only.name == PLACEHOLDER_SERIES && only.values.is_empty())
    }
}

/// Render-ready chart.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum ChartModel {
    Series(SeriesModel),
    /// Grids keep their shape for a dedicated renderer; cells are already
    /// coerced to numbers and labels to strings by the payload parser
    Heatmap(HeatmapGrid),
}

impl ChartModel {
    pub fn kind(&self) -> ChartKind {
        match self {
            ChartModel::Series(model) => model.kind,
            ChartModel::Heatmap(_) => ChartKind::Heatmap,
        }
    }

    /// True when there is nothing to draw. Not an error.
    pub fn is_empty(&self) -> bool {
        match self {
            ChartModel::Series(model) => model.series.iter().all(|s| s.values.is_empty()),
            ChartModel::Heatmap(grid) => grid.z.iter().all(Vec::is_empty),
        }
    }

    pub fn as_series(&self) -> Option<&SeriesModel> {
        match self {
            ChartModel::Series(model) => Some(model),
            ChartModel::Heatmap(_) => None,
        }
    }
}

/// Normalizes a raw `chart_data` value for `kind`.
pub fn normalize(kind: ChartKind, raw: &Value, request: &ChartRequest) -> ChartModel {
    normalize_payload(kind, &ChartPayload::parse(kind, raw), request)
}

/// Normalizes an already classified payload.
pub fn normalize_payload(kind: ChartKind, payload: &ChartPayload, request: &ChartRequest) -> ChartModel {
    let model = match (kind, payload) {
        (ChartKind::Heatmap, ChartPayload::Grid(grid)) => return ChartModel::Heatmap(grid.clone()),
        (ChartKind::Bar | ChartKind::Line, ChartPayload::Columns { labels, series }) => {
            Some(from_columns(kind, labels, series))
        }
        (ChartKind::Bar | ChartKind::Line, ChartPayload::Records(rows)) => from_records(kind, rows, request),
        (ChartKind::Bar | ChartKind::Line, ChartPayload::GroupedRecords(groups)) => {
            from_groups(kind, groups, request)
        }
        (ChartKind::Pie | ChartKind::Doughnut, ChartPayload::Slices { labels, values }) => {
            let name = request
                .y_columns
                .first()
                .cloned()
                .unwrap_or_else(|| "values".to_string());
            Some(from_slices(kind, labels, values, name))
        }
        (ChartKind::Histogram, ChartPayload::Bins { counts, edges }) => from_bins(counts, edges),
        (ChartKind::Histogram, ChartPayload::Slices { labels, values }) => Some(SeriesModel {
            kind,
            labels: Some(labels.clone()),
            series: vec![Series {
                name: HISTOGRAM_SERIES.to_string(),
                values: SeriesValues::Scalars(fit_to_labels(HISTOGRAM_SERIES, values, labels.len())),
                hints: RenderHints::indexed(0),
            }],
        }),
        (ChartKind::Scatter, ChartPayload::Points(series)) => from_points(series),
        _ => None,
    };

    match model {
        Some(model) if !model.series.is_empty() => ChartModel::Series(model),
        _ => {
            debug!("{} payload has no drawable shape, using placeholder", kind);
            ChartModel::Series(SeriesModel::placeholder(kind))
        }
    }
}

/// Pads or truncates `values` to one entry per label.
fn fit_to_labels(name: &str, values: &[Option<f64>], label_count: usize) -> Vec<Option<f64>> {
    if values.len() != label_count {
        warn!(
            "series '{}' has {} values for {} labels, {} to match",
            name,
            values.len(),
            label_count,
            if values.len() < label_count { "padding" } else { "truncating" }
        );
    }
    let mut fitted = values.to_vec();
    fitted.resize(label_count, None);
    fitted
}

fn from_columns(kind: ChartKind, labels: &[String], series: &[(String, Vec<Option<f64>>)]) -> SeriesModel {
    SeriesModel {
        kind,
        labels: Some(labels.to_vec()),
        series: series
            .iter()
            .enumerate()
            .map(|(i, (name, values))| Series {
                name: name.clone(),
                values: SeriesValues::Scalars(fit_to_labels(name, values, labels.len())),
                hints: RenderHints::indexed(i),
            })
            .collect(),
    }
}

/// Y columns to slice from records: the configured ones, else every key of
/// the first record other than the x column.
fn record_y_columns(rows: &[Row], request: &ChartRequest, x: &str) -> Vec<String> {
    if !request.y_columns.is_empty() {
        return request.y_columns.clone();
    }
    rows.first()
        .map(|row| row.keys().filter(|k| k.as_str() != x).cloned().collect())
        .unwrap_or_default()
}

fn from_records(kind: ChartKind, rows: &[Row], request: &ChartRequest) -> Option<SeriesModel> {
    let x = request.x_column.as_deref()?;
    let ys = record_y_columns(rows, request, x);
    let labels = rows
        .iter()
        .map(|row| row.get(x).map(cell_display).unwrap_or_default())
        .collect();
    let series = ys
        .iter()
        .enumerate()
        .map(|(i, y)| Series {
            name: y.clone(),
            values: SeriesValues::Scalars(rows.iter().map(|row| row.get(y).and_then(cell_number)).collect()),
            hints: RenderHints::indexed(i),
        })
        .collect();
    Some(SeriesModel {
        kind,
        labels: Some(labels),
        series,
    })
}

fn from_groups(kind: ChartKind, groups: &[(String, Vec<Row>)], request: &ChartRequest) -> Option<SeriesModel> {
    let x = request.x_column.as_deref()?;
    let all_rows: Vec<Row> = groups.iter().flat_map(|(_, rows)| rows.iter().cloned()).collect();
    let ys = record_y_columns(&all_rows, request, x);

    let mut labels: Vec<String> = Vec::new();
    for row in &all_rows {
        let label = row.get(x).map(cell_display).unwrap_or_default();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    let mut series = Vec::new();
    for (group, rows) in groups {
        for y in &ys {
            let mut values = vec![None; labels.len()];
            for row in rows {
                let label = row.get(x).map(cell_display).unwrap_or_default();
                if let Some(pos) = labels.iter().position(|l| *l == label) {
                    values[pos] = row.get(y).and_then(cell_number);
                }
            }
            let name = if ys.len() == 1 {
                group.clone()
            } else {
                format!("{} - {}", group, y)
            };
            let index = series.len();
            series.push(Series {
                name,
                values: SeriesValues::Scalars(values),
                hints: RenderHints::indexed(index),
            });
        }
    }

    Some(SeriesModel {
        kind,
        labels: Some(labels),
        series,
    })
}

fn from_slices(kind: ChartKind, labels: &[String], values: &[Option<f64>], name: String) -> SeriesModel {
    let values = fit_to_labels(&name, values, labels.len());
    SeriesModel {
        kind,
        labels: Some(labels.to_vec()),
        series: vec![Series {
            name,
            values: SeriesValues::Scalars(values),
            hints: RenderHints {
                color: palette_color(0),
                slice_colors: (0..labels.len()).map(palette_color).collect(),
            },
        }],
    }
}

/// Formats the midpoint of each adjacent edge pair as a bin label.
pub fn bin_labels(edges: &[f64]) -> Vec<String> {
    edges
        .windows(2)
        .map(|pair| format!("{:.*}", BIN_LABEL_PRECISION, (pair[0] + pair[1]) / 2.0))
        .collect()
}

fn from_bins(counts: &[Option<f64>], edges: &[f64]) -> Option<SeriesModel> {
    if edges.len() != counts.len() + 1 {
        debug!(
            "histogram has {} counts but {} edges, using placeholder",
            counts.len(),
            edges.len()
        );
        return None;
    }
    Some(SeriesModel {
        kind: ChartKind::Histogram,
        labels: Some(bin_labels(edges)),
        series: vec![Series {
            name: HISTOGRAM_SERIES.to_string(),
            values: SeriesValues::Scalars(counts.to_vec()),
            hints: RenderHints::indexed(0),
        }],
    })
}

/// Maps a size value to a radius, relative to the largest size across all
/// series. The floor keeps zero-sized points visible.
fn point_radius(size: Option<f64>, max_size: f64) -> f64 {
    match size {
        Some(s) if max_size > 0.0 => (s.abs() / max_size * MAX_POINT_RADIUS).max(MIN_POINT_RADIUS),
        _ => MIN_POINT_RADIUS,
    }
}

/// Category labels for the x axis, in first-seen order, when any x value
/// is not a number. `None` keeps the axis numeric.
fn point_categories(input: &[PointSeries]) -> Option<Vec<String>> {
    let xs = input.iter().flat_map(|s| s.x.iter()).filter(|x| !x.is_null());
    if xs.clone().all(|x| cell_number(x).is_some()) {
        return None;
    }
    let mut categories: Vec<String> = Vec::new();
    for x in xs {
        let label = cell_display(x);
        if !categories.contains(&label) {
            categories.push(label);
        }
    }
    Some(categories)
}

fn from_points(input: &[PointSeries]) -> Option<SeriesModel> {
    let categories = point_categories(input);
    let x_position = |x: &Value| -> Option<f64> {
        if x.is_null() {
            return None;
        }
        match &categories {
            Some(labels) => {
                let label = cell_display(x);
                labels.iter().position(|l| *l == label).map(|i| i as f64)
            }
            None => cell_number(x),
        }
    };

    let max_size = input
        .iter()
        .filter_map(|s| s.size.as_ref())
        .flatten()
        .flatten()
        .fold(0.0_f64, |acc, s| acc.max(s.abs()));

    let series = input
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if s.x.len() != s.y.len() {
                warn!(
                    "scatter series '{}' has {} x values and {} y values",
                    s.name,
                    s.x.len(),
                    s.y.len()
                );
            }
            let len = s.x.len().max(s.y.len());
            let mut points = Vec::with_capacity(len);
            let mut skipped = 0usize;
            for j in 0..len {
                let x = s.x.get(j).and_then(&x_position);
                let y = s.y.get(j).copied().flatten();
                let (Some(x), Some(y)) = (x, y) else {
                    skipped += 1;
                    continue;
                };
                let radius = match &s.size {
                    Some(sizes) => point_radius(sizes.get(j).copied().flatten(), max_size),
                    None => DEFAULT_POINT_RADIUS,
                };
                points.push(Point { x, y, radius });
            }
            if skipped > 0 {
                warn!("scatter series '{}' skipped {} points without coordinates", s.name, skipped);
            }
            Series {
                name: s.name.clone(),
                values: SeriesValues::Points(points),
                hints: RenderHints::indexed(i),
            }
        })
        .collect();

    Some(SeriesModel {
        kind: ChartKind::Scatter,
        labels: categories,
        series,
    })
}
