#![cfg(not(tarpaulin_include))]
//! PNG rendering of normalized chart models with plotters.

use plotters::element::Pie;
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

use crate::chart::ChartKind;
use crate::normalize::{ChartModel, Color, SeriesModel};
use crate::payload::HeatmapGrid;

/// Configuration options for rendering
///
/// Axis labels only apply to cartesian kinds.
#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            x_label: String::new(),
            y_label: String::new(),
            width: 800,
            height: 600,
        }
    }
}

fn rgb(color: Color) -> RGBColor {
    RGBColor(color.r, color.g, color.b)
}

/// Renders `model` to PNG bytes.
///
/// The image is drawn into a temporary file and read back; an empty model
/// produces a titled canvas saying there is nothing to draw.
pub fn render_png(model: &ChartModel, options: &RenderOptions) -> Result<Vec<u8>, Box<dyn Error>> {
    let file = tempfile::Builder::new().suffix(".png").tempfile()?;
    render_to_file(model, options, file.path())?;
    Ok(std::fs::read(file.path())?)
}

/// Renders `model` straight to a PNG file at `path`.
pub fn render_to_file(model: &ChartModel, options: &RenderOptions, path: &Path) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    if model.is_empty() {
        draw_empty(&root, options)?;
        root.present()?;
        return Ok(());
    }

    match model {
        ChartModel::Heatmap(grid) => draw_heatmap(&root, grid, options)?,
        ChartModel::Series(series) => match series.kind {
            ChartKind::Bar | ChartKind::Histogram => draw_bars(&root, series, options)?,
            ChartKind::Line => draw_lines(&root, series, options)?,
            ChartKind::Pie | ChartKind::Doughnut => draw_pie(&root, series, options)?,
            ChartKind::Scatter => draw_scatter(&root, series, options)?,
            ChartKind::Heatmap => draw_empty(&root, options)?,
        },
    }

    root.present()?;
    Ok(())
}

fn draw_empty(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    options: &RenderOptions,
) -> Result<(), Box<dyn Error>> {
    root.titled(&options.title, ("sans-serif", 30).into_font())?;
    let center = (options.width as i32 / 2 - 40, options.height as i32 / 2);
    root.draw(&Text::new("No data", center, ("sans-serif", 24).into_font()))?;
    Ok(())
}

/// Y range covering every value and zero, with some headroom.
fn value_range(model: &SeriesModel) -> (f64, f64) {
    let values = model
        .series
        .iter()
        .filter_map(|s| s.scalars())
        .flatten()
        .flatten()
        .copied();
    let (min, max) = values.fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let max = if max <= min { min + 1.0 } else { max * 1.1 };
    (min.min(0.0), max)
}

fn label_at(labels: &[String], x: f64) -> String {
    let i = x.round();
    if (x - i).abs() > 1e-6 || i < 0.0 {
        return String::new();
    }
    labels.get(i as usize).cloned().unwrap_or_default()
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    model: &SeriesModel,
    options: &RenderOptions,
) -> Result<(), Box<dyn Error>> {
    let labels = model.labels.clone().unwrap_or_default();
    let n = labels.len().max(1);
    let (min_y, max_y) = value_range(model);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), min_y..max_y)?;

    let formatter = |x: &f64| label_at(&labels, *x);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&formatter)
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    // Series share each category slot side by side.
    let width = 0.8 / model.series.len().max(1) as f64;
    for (s, series) in model.series.iter().enumerate() {
        let color = rgb(series.hints.color);
        let Some(values) = series.scalars() else {
            continue;
        };
        chart
            .draw_series(values.iter().enumerate().filter_map(|(i, v)| {
                let v = (*v)?;
                let x0 = i as f64 - 0.4 + s as f64 * width;
                Some(Rectangle::new([(x0, 0.0), (x0 + width, v)], color.filled()))
            }))?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));
    }

    if model.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_lines(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    model: &SeriesModel,
    options: &RenderOptions,
) -> Result<(), Box<dyn Error>> {
    let labels = model.labels.clone().unwrap_or_default();
    let n = labels.len().max(1);
    let (min_y, max_y) = value_range(model);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), min_y..max_y)?;

    let formatter = |x: &f64| label_at(&labels, *x);
    chart
        .configure_mesh()
        .x_labels(n)
        .x_label_formatter(&formatter)
        .x_desc(&options.x_label)
        .y_desc(&options.y_label)
        .draw()?;

    for series in &model.series {
        let color = rgb(series.hints.color);
        let Some(values) = series.scalars() else {
            continue;
        };
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
            .collect();
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(series.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart.draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.filled())))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    model: &SeriesModel,
    options: &RenderOptions,
) -> Result<(), Box<dyn Error>> {
    let Some(series) = model.series.first() else {
        return draw_empty(root, options);
    };
    let labels = model.labels.clone().unwrap_or_default();
    let sizes: Vec<f64> = series
        .scalars()
        .unwrap_or_default()
        .iter()
        .map(|v| v.unwrap_or(0.0).max(0.0))
        .collect();
    if sizes.iter().sum::<f64>() <= 0.0 {
        return draw_empty(root, options);
    }
    let colors: Vec<RGBColor> = series.hints.slice_colors.iter().copied().map(rgb).collect();

    let area = root.titled(&options.title, ("sans-serif", 30).into_font())?;
    let (w, h) = area.dim_in_pixel();
    let center = (w as i32 / 2, h as i32 / 2);
    let radius = (w.min(h) as f64 / 2.0) * 0.75;

    let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
    pie.label_style(("sans-serif", 16).into_font());
    area.draw(&pie)?;

    if model.kind == ChartKind::Doughnut {
        area.draw(&Circle::new(center, (radius * 0.5) as i32, WHITE.filled()))?;
    }
    Ok(())
}

fn draw_scatter(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    model: &SeriesModel,
    options: &RenderOptions,
) -> Result<(), Box<dyn Error>> {
    let all = model.series.iter().filter_map(|s| s.points()).flatten();
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for p in all {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    let pad = |lo: f64, hi: f64| {
        let span = (hi - lo).abs().max(1.0) * 0.05;
        (lo - span, hi + span)
    };
    // A categorical x axis puts each category on its integer slot.
    let categories = model.labels.clone().unwrap_or_default();
    let (min_x, max_x) = if categories.is_empty() {
        pad(min_x, max_x)
    } else {
        (-0.5, categories.len() as f64 - 0.5)
    };
    let (min_y, max_y) = pad(min_y, max_y);

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(min_x..max_x, min_y..max_y)?;

    if categories.is_empty() {
        chart
            .configure_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .draw()?;
    } else {
        let formatter = |x: &f64| label_at(&categories, *x);
        chart
            .configure_mesh()
            .x_labels(categories.len())
            .x_label_formatter(&formatter)
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .draw()?;
    }

    for series in &model.series {
        let color = rgb(series.hints.color);
        let Some(points) = series.points() else {
            continue;
        };
        chart
            .draw_series(
                points
                    .iter()
                    .map(|p| Circle::new((p.x, p.y), p.radius.round() as i32, color.mix(0.6).filled())),
            )?
            .label(series.name.as_str())
            .legend(move |(x, y)| Circle::new((x + 8, y), 5, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

/// Blue for the low end, white in the middle, red for the high end.
fn heat_color(value: f64, min: f64, max: f64) -> RGBColor {
    let t = if max > min { (value - min) / (max - min) } else { 0.5 };
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        let k = t * 2.0;
        RGBColor((59.0 + k * 196.0) as u8, (76.0 + k * 179.0) as u8, 192 + (k * 63.0) as u8)
    } else {
        let k = (t - 0.5) * 2.0;
        RGBColor(255 - (k * 75.0) as u8, (255.0 - k * 251.0) as u8, (255.0 - k * 217.0) as u8)
    }
}

fn draw_heatmap(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    grid: &HeatmapGrid,
    options: &RenderOptions,
) -> Result<(), Box<dyn Error>> {
    let rows = grid.z.len().max(1);
    let cols = grid.z.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let (min, max) = grid
        .z
        .iter()
        .flatten()
        .flatten()
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(0.0..cols as f64, 0.0..rows as f64)?;

    let x_formatter = |x: &f64| label_at(&grid.x, *x - 0.5);
    let y_formatter = |y: &f64| label_at(&grid.y, *y - 0.5);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(cols * 2 + 1)
        .y_labels(rows * 2 + 1)
        .x_label_formatter(&x_formatter)
        .y_label_formatter(&y_formatter)
        .draw()?;

    chart.draw_series(grid.z.iter().enumerate().flat_map(|(i, row)| {
        row.iter().enumerate().map(move |(j, v)| {
            let fill = match v {
                Some(v) => heat_color(*v, min, max),
                None => RGBColor(220, 220, 220),
            };
            Rectangle::new([(j as f64, i as f64), (j as f64 + 1.0, i as f64 + 1.0)], fill.filled())
        })
    }))?;

    chart.draw_series(grid.z.iter().enumerate().flat_map(|(i, row)| {
        row.iter().enumerate().filter_map(move |(j, v)| {
            v.map(|v| {
                Text::new(
                    format!("{:.2}", v),
                    (j as f64 + 0.4, i as f64 + 0.55),
                    ("sans-serif", 14).into_font(),
                )
            })
        })
    }))?;

    Ok(())
}

/// Renders one chart of every kind from built-in sample payloads into
/// `output_dir`.
///
/// # Returns
/// * `(kind, path)` for each chart that rendered
pub fn create_example_charts(output_dir: &str) -> Vec<(String, String)> {
    use crate::chart::ChartRequest;
    use crate::normalize::normalize;
    use serde_json::json;

    let mut result = Vec::new();
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        log::warn!("could not create {}: {}", output_dir, e);
        return result;
    }

    let samples = [
        (
            ChartKind::Bar,
            json!({"x": ["north", "south", "east", "west"], "y": {"sales": [10, 25, 15, 30], "returns": [2, 4, 1, 5]}}),
        ),
        (
            ChartKind::Line,
            json!({"x": ["jan", "feb", "mar", "apr", "may"], "y": {"visits": [120, 180, 150, 220, 260]}}),
        ),
        (ChartKind::Pie, json!({"labels": ["a", "b", "c"], "values": [45, 30, 25]})),
        (ChartKind::Doughnut, json!({"labels": ["x", "y"], "values": [60, 40]})),
        (ChartKind::Histogram, json!({"data": [3, 7, 12, 5], "bins": [0, 5, 10, 15, 20]})),
        (
            ChartKind::Scatter,
            json!({"data": [{"name": "height", "x": [1, 2, 3, 4], "y": [4, 3, 5, 7], "size": [1, 5, 10, 0]}]}),
        ),
        (
            ChartKind::Heatmap,
            json!({"x": ["a", "b"], "y": ["a", "b"], "z": [[1.0, 0.42], [0.42, 1.0]]}),
        ),
    ];

    for (kind, raw) in samples {
        let model = normalize(kind, &raw, &ChartRequest::new(kind));
        let options = RenderOptions {
            title: format!("Example {} chart", kind),
            width: 600,
            height: 400,
            ..RenderOptions::default()
        };
        let path = format!("{}/{}_chart.png", output_dir, kind);
        match render_to_file(&model, &options, Path::new(&path)) {
            Ok(()) => result.push((kind.to_string(), path)),
            Err(e) => log::warn!("rendering {} failed: {}", kind, e),
        }
    }

    result
}
