use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChartError;

/// Chart kinds the normalization engine understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Doughnut,
    Histogram,
    Scatter,
    Heatmap,
}

impl ChartKind {
    pub const ALL: [ChartKind; 7] = [
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Pie,
        ChartKind::Doughnut,
        ChartKind::Histogram,
        ChartKind::Scatter,
        ChartKind::Heatmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Doughnut => "doughnut",
            ChartKind::Histogram => "histogram",
            ChartKind::Scatter => "scatter",
            ChartKind::Heatmap => "heatmap",
        }
    }

    /// Chart type sent to the backend. Doughnuts are drawn from pie data.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ChartKind::Doughnut => "pie",
            other => other.as_str(),
        }
    }

    /// Point clouds carry their coordinates in the series; labels only name
    /// the categories of a non-numeric x axis.
    pub fn is_point_cloud(&self) -> bool {
        matches!(self, ChartKind::Scatter)
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            "doughnut" | "donut" => Ok(ChartKind::Doughnut),
            "histogram" | "hist" => Ok(ChartKind::Histogram),
            "scatter" => Ok(ChartKind::Scatter),
            "heatmap" => Ok(ChartKind::Heatmap),
            other => Err(format!("unknown chart kind '{}'", other)),
        }
    }
}

/// How the backend folds multiple y values sharing one x value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Sum,
    Count,
    Min,
    Max,
    Median,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Median => "median",
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "avg" => Ok(Aggregation::Mean),
            "sum" => Ok(Aggregation::Sum),
            "count" => Ok(Aggregation::Count),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "median" => Ok(Aggregation::Median),
            other => Err(format!("unknown aggregation '{}'", other)),
        }
    }
}

/// User-built chart configuration, consumed once per generation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartRequest {
    pub kind: Option<ChartKind>,
    pub x_column: Option<String>,
    pub y_columns: Vec<String>,
    pub group_by: Option<String>,
    pub aggregation: Aggregation,
    /// Histogram bin count; the backend defaults to 10.
    pub bins: Option<u32>,
}

impl ChartRequest {
    pub fn new(kind: ChartKind) -> Self {
        ChartRequest {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn x(mut self, column: impl Into<String>) -> Self {
        self.x_column = Some(column.into());
        self
    }

    pub fn y(mut self, column: impl Into<String>) -> Self {
        self.y_columns.push(column.into());
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by = Some(column.into());
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn bins(mut self, bins: u32) -> Self {
        self.bins = Some(bins);
        self
    }

    fn has_x(&self) -> bool {
        self.x_column.as_deref().is_some_and(|x| !x.trim().is_empty())
    }

    /// Rejects configurations the backend cannot serve, before any network
    /// call is made.
    pub fn validate(&self) -> Result<ChartKind, ChartError> {
        let kind = self
            .kind
            .ok_or_else(|| ChartError::Precondition("Select a chart type".to_string()))?;
        let ys = self.y_columns.len();

        let problem = match kind {
            ChartKind::Bar | ChartKind::Line if !self.has_x() || ys == 0 => {
                Some("X column and Y columns are required for bar/line charts")
            }
            ChartKind::Pie | ChartKind::Doughnut if !self.has_x() || ys != 1 => {
                Some("X column and exactly one Y column are required for pie charts")
            }
            ChartKind::Scatter if !self.has_x() || ys == 0 => {
                Some("X column and at least one Y column are required for scatter plots")
            }
            ChartKind::Histogram if ys != 1 => Some("Exactly one column is required for histograms"),
            ChartKind::Heatmap if ys < 2 => Some("At least two columns are required for heatmaps"),
            _ => None,
        };

        match problem {
            Some(message) => Err(ChartError::Precondition(message.to_string())),
            None if self.bins == Some(0) => Err(ChartError::Precondition(
                "Histogram bin count must be positive".to_string(),
            )),
            None => Ok(kind),
        }
    }
}

/// Chart kinds and column classes the backend offers for the active dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartCatalog {
    #[serde(default)]
    pub available_charts: Vec<String>,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    #[serde(default)]
    pub categorical_columns: Vec<String>,
}

impl ChartCatalog {
    /// Whether the backend offers `kind`; doughnut rides on pie.
    pub fn supports(&self, kind: ChartKind) -> bool {
        let wanted = kind.wire_name();
        self.available_charts.iter().any(|c| c == wanted)
    }

    /// Kinds the client can offer, in `ChartKind::ALL` order.
    pub fn kinds(&self) -> Vec<ChartKind> {
        ChartKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }
}
