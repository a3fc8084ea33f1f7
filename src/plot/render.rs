//! The built-in renderers. Each checks the shape of its data before
//! creating the image file.

use std::{fmt::Display, ops::Range, path::Path};

use anyhow::{anyhow, bail, Result};
use plotters::{coord::Shift, prelude::*};

use super::{BoxSummary, Frame, Panel, PlotData, PlotOptions, Series};

const FONT: &str = "sans-serif";

fn plot_err<E: Display>(e: E) -> anyhow::Error {
    anyhow!("drawing failed: {e}")
}

fn wrong_shape(tag: &str, expected: &str, data: &PlotData) -> anyhow::Error {
    anyhow!(
        "plot type {tag:?} needs {expected} data, got {}",
        data.shape_name()
    )
}

/// `min..max` of `values` widened by 5%, or `0..1` without values.
fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return 0.0..1.0;
    }
    if lo == hi {
        return (lo - 1.)..(hi + 1.);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad)..(hi + pad)
}

fn x_range(series: &[Series]) -> Range<f64> {
    padded_range(series.iter().flat_map(|s| s.points.iter().map(|p| p.x)))
}

fn y_range(series: &[Series], axhline: Option<f64>) -> Range<f64> {
    padded_range(
        series
            .iter()
            .flat_map(|s| {
                s.points.iter().flat_map(|p| {
                    let (lo, hi) = p.err.unwrap_or((p.y, p.y));
                    [p.y, lo, hi]
                })
            })
            .chain(axhline),
    )
}

struct PanelSpec<'a> {
    title: &'a str,
    xlabel: &'a str,
    ylabel: &'a str,
    ylim: Option<(f64, f64)>,
    axhline: Option<f64>,
    x: Range<f64>,
    series: &'a [Series],
}

fn draw_panel(area: &DrawingArea<BitMapBackend<'_>, Shift>, spec: &PanelSpec) -> Result<()> {
    let y = match spec.ylim {
        Some((lo, hi)) if lo < hi => lo..hi,
        _ => y_range(spec.series, spec.axhline),
    };
    let x = spec.x.clone();
    let mut chart = ChartBuilder::on(area)
        .caption(spec.title, (FONT, 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x.clone(), y)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(spec.xlabel)
        .y_desc(spec.ylabel)
        .draw()
        .map_err(plot_err)?;

    for (i, series) in spec.series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(
                series.points.iter().map(|p| (p.x, p.y)),
                color.stroke_width(2),
            ))
            .map_err(plot_err)?
            .label(series.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        chart
            .draw_series(
                series
                    .points
                    .iter()
                    .map(|p| Circle::new((p.x, p.y), 3, color.filled())),
            )
            .map_err(plot_err)?;
        chart
            .draw_series(series.points.iter().filter_map(|p| {
                let (lo, hi) = p.err?;
                Some(ErrorBar::new_vertical(p.x, lo, p.y, hi, color.filled(), 8))
            }))
            .map_err(plot_err)?;
    }
    if let Some(h) = spec.axhline {
        chart
            .draw_series(LineSeries::new(vec![(x.start, h), (x.end, h)], RED.stroke_width(1)))
            .map_err(plot_err)?;
    }
    if spec.series.iter().any(|s| !s.label.is_empty()) {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(plot_err)?;
    }
    Ok(())
}

fn series_chart(series: &[Series], options: &PlotOptions, path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, options.size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    draw_panel(
        &root,
        &PanelSpec {
            title: &options.title,
            xlabel: &options.xlabel,
            ylabel: &options.ylabel,
            ylim: options.ylim,
            axhline: options.axhline,
            x: x_range(series),
            series,
        },
    )?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// One series over x, with error bars if given.
pub fn basic(data: &PlotData, options: &PlotOptions, path: &Path) -> Result<()> {
    match data {
        PlotData::Series(series) if series.len() == 1 => series_chart(series, options, path),
        PlotData::Series(series) => bail!("plot type \"basic\" needs 1 series, got {}", series.len()),
        _ => Err(wrong_shape("basic", "series", data)),
    }
}

/// Several series in one chart, with legend.
pub fn single_frame(data: &PlotData, options: &PlotOptions, path: &Path) -> Result<()> {
    match data {
        PlotData::Series(series) => series_chart(series, options, path),
        _ => Err(wrong_shape("single_frame", "series", data)),
    }
}

fn draw_panel_column(
    areas: &[DrawingArea<BitMapBackend<'_>, Shift>],
    title: &str,
    panels: &[Panel],
    options: &PlotOptions,
) -> Result<()> {
    let all_series: Vec<Series> = panels.iter().flat_map(|p| p.series.clone()).collect();
    let x = x_range(&all_series);
    for (i, (area, panel)) in areas.iter().zip(panels).enumerate() {
        let last = i + 1 == panels.len();
        draw_panel(
            area,
            &PanelSpec {
                title: if i == 0 { title } else { "" },
                xlabel: if last { &options.xlabel } else { "" },
                ylabel: &panel.ylabel,
                ylim: panel.ylim,
                axhline: None,
                x: x.clone(),
                series: &panel.series,
            },
        )?;
    }
    Ok(())
}

/// Panels stacked vertically, sharing the x range.
pub fn stacked(data: &PlotData, options: &PlotOptions, path: &Path) -> Result<()> {
    let PlotData::Panels(panels) = data else {
        return Err(wrong_shape("stacked", "panels", data));
    };
    if panels.is_empty() {
        bail!("plot type \"stacked\" needs at least one panel")
    }
    let root = BitMapBackend::new(path, options.size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let areas = root.split_evenly((panels.len(), 1));
    draw_panel_column(&areas, &options.title, panels, options)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Frames side by side, each a column of stacked panels.
pub fn stacked_frames(data: &PlotData, options: &PlotOptions, path: &Path) -> Result<()> {
    let PlotData::Frames(frames) = data else {
        return Err(wrong_shape("stacked_frames", "frames", data));
    };
    let rows = frames.iter().map(|f| f.panels.len()).max().unwrap_or(0);
    if rows == 0 {
        bail!("plot type \"stacked_frames\" needs at least one panel")
    }
    let root = BitMapBackend::new(path, options.size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let cols = frames.len();
    let areas = root.split_evenly((rows, cols));
    for (j, Frame { title, panels }) in frames.iter().enumerate() {
        let column: Vec<_> = (0..panels.len())
            .map(|i| areas[i * cols + j].clone())
            .collect();
        draw_panel_column(&column, title, panels, options)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Box and whisker per label.
pub fn whisker(data: &PlotData, options: &PlotOptions, path: &Path) -> Result<()> {
    let PlotData::Boxes(boxes) = data else {
        return Err(wrong_shape("whisker", "boxes", data));
    };
    if boxes.is_empty() {
        bail!("plot type \"whisker\" needs at least one box")
    }
    let y = match options.ylim {
        Some((lo, hi)) if lo < hi => lo..hi,
        _ => padded_range(boxes.iter().flat_map(|b| [b.min, b.max]).chain(options.axhline)),
    };
    let labels: Vec<&str> = boxes.iter().map(|b| b.label.as_str()).collect();
    let label_of = |x: &f64| -> String {
        let i = x.round();
        if (x - i).abs() < 1e-6 && i >= 0. {
            labels.get(i as usize).map(|s| s.to_string()).unwrap_or_default()
        } else {
            String::new()
        }
    };

    let root = BitMapBackend::new(path, options.size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let x = -0.5..(boxes.len() as f64 - 0.5);
    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, (FONT, 22))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x.clone(), y)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(boxes.len() * 2 + 1)
        .x_label_formatter(&label_of)
        .x_desc(&options.xlabel)
        .y_desc(&options.ylabel)
        .draw()
        .map_err(plot_err)?;

    for (i, b) in boxes.iter().enumerate() {
        let BoxSummary {
            label: _,
            min,
            q1,
            median,
            q3,
            max,
        } = *b;
        let xc = i as f64;
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series([Rectangle::new(
                [(xc - 0.3, q1), (xc + 0.3, q3)],
                color.mix(0.4).filled(),
            )])
            .map_err(plot_err)?;
        chart
            .draw_series([
                PathElement::new(vec![(xc - 0.3, median), (xc + 0.3, median)], BLACK.stroke_width(2)),
                PathElement::new(vec![(xc, q3), (xc, max)], BLACK.stroke_width(1)),
                PathElement::new(vec![(xc, q1), (xc, min)], BLACK.stroke_width(1)),
                PathElement::new(vec![(xc - 0.15, max), (xc + 0.15, max)], BLACK.stroke_width(1)),
                PathElement::new(vec![(xc - 0.15, min), (xc + 0.15, min)], BLACK.stroke_width(1)),
            ])
            .map_err(plot_err)?;
    }
    if let Some(h) = options.axhline {
        chart
            .draw_series(LineSeries::new(vec![(x.start, h), (x.end, h)], RED.stroke_width(1)))
            .map_err(plot_err)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}

/// The distinct x and y values of `points`, ascending, and the mean
/// z of each (x, y) cell, `None` where no point falls.
fn surface_grid(points: &[(f64, f64, f64)]) -> (Vec<f64>, Vec<f64>, Vec<Vec<Option<f64>>>) {
    let distinct = |values: &mut Vec<f64>| {
        values.retain(|v| v.is_finite());
        values.sort_by(f64::total_cmp);
        values.dedup();
    };
    let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let mut ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    distinct(&mut xs);
    distinct(&mut ys);

    let mut sums = vec![vec![(0., 0usize); ys.len()]; xs.len()];
    for (x, y, z) in points {
        let (Some(i), Some(j)) = (
            xs.iter().position(|v| v == x),
            ys.iter().position(|v| v == y),
        ) else {
            continue;
        };
        if z.is_finite() {
            sums[i][j].0 += z;
            sums[i][j].1 += 1;
        }
    }
    let cells = sums
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(sum, n)| (n > 0).then(|| sum / n as f64))
                .collect()
        })
        .collect();
    (xs, ys, cells)
}

/// Surface over the x-y grid with its wireframe, z vertical. Grid
/// cells without a point lie on the floor of the z range.
pub fn three_d(data: &PlotData, options: &PlotOptions, path: &Path) -> Result<()> {
    let PlotData::Points(points) = data else {
        return Err(wrong_shape("3d", "points", data));
    };
    if points.is_empty() {
        bail!("plot type \"3d\" needs at least one point")
    }
    let xr = padded_range(points.iter().map(|p| p.0));
    let yr = padded_range(points.iter().map(|p| p.1));
    let zr = {
        let r = padded_range(points.iter().map(|p| p.2));
        r.start.min(0.)..r.end
    };
    let (xs, ys, cells) = surface_grid(points);
    let floor = zr.start;
    let height = |i: usize, j: usize| cells[i][j].unwrap_or(floor);
    let index_of = |values: &[f64], v: f64| values.iter().position(|w| *w == v).unwrap_or(0);

    let root = BitMapBackend::new(path, options.size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let caption = format!(
        "{} (x: {}, y: {}, vertical: {})",
        options.title, options.xlabel, options.ylabel, options.zlabel
    );
    // plotters' vertical axis is the second coordinate
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, (FONT, 20))
        .margin(20)
        .build_cartesian_3d(xr, zr, yr)
        .map_err(plot_err)?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.3;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    chart
        .configure_axes()
        .light_grid_style(BLACK.mix(0.15))
        .max_light_lines(3)
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            SurfaceSeries::xoz(xs.iter().copied(), ys.iter().copied(), |x: f64, y: f64| {
                height(index_of(&xs, x), index_of(&ys, y))
            })
            .style(BLUE.mix(0.3).filled()),
        )
        .map_err(plot_err)?;
    for i in 0..xs.len() {
        chart
            .draw_series(LineSeries::new(
                (0..ys.len()).map(|j| (xs[i], height(i, j), ys[j])),
                BLACK.mix(0.6),
            ))
            .map_err(plot_err)?;
    }
    for j in 0..ys.len() {
        chart
            .draw_series(LineSeries::new(
                (0..xs.len()).map(|i| (xs[i], height(i, j), ys[j])),
                BLACK.mix(0.6),
            ))
            .map_err(plot_err)?;
    }
    chart
        .draw_series(
            points
                .iter()
                .map(|(x, y, z)| Circle::new((*x, *z, *y), 4, BLUE.filled())),
        )
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}
