//! PNG time series plots of extracted model data.

use crate::data_io::Frame;
use crate::error::{EvalError, Result};
use crate::extract::{ModelSeries, WindSeries};
use crate::lookup::{ModelName, Site, Variable};
use crate::retrieve::UkvRetrieval;
use crate::time_utils::DoyDate;
use chrono::{Duration, NaiveDateTime};
use plotters::coord::types::RangedDateTime;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::info;

const SIZE: (u32, u32) = (2000, 1000);
const WIND_SIZE: (u32, u32) = (2000, 1500);
const PALETTE: [RGBColor; 6] = [BLUE, RED, GREEN, MAGENTA, CYAN, BLACK];

/// Where a run's plots go and what they are titled with.
#[derive(Debug, Clone)]
pub struct PlotMeta {
    pub site: Site,
    pub start: DoyDate,
    pub stop: DoyDate,
    pub save_folder: PathBuf,
}

/// One legend entry drawn as separate line segments.
#[derive(Debug, Clone)]
struct Line {
    label: Option<String>,
    colour: RGBColor,
    segments: Vec<Vec<(NaiveDateTime, f64)>>,
}

fn plot_err<E: Display>(e: E) -> EvalError {
    EvalError::Plot(e.to_string())
}

/// `<save><variable>_<model>_<site>_<start>_<stop>.png`
pub fn plot_file_name(
    save_folder: &Path,
    variable: Variable,
    model: ModelName,
    site: Site,
    start: DoyDate,
    stop: DoyDate,
) -> PathBuf {
    save_folder.join(format!(
        "{}_{}_{}_{}_{}.png",
        variable, model, site, start, stop
    ))
}

pub fn plot_title(site: Site, start: DoyDate, stop: DoyDate) -> String {
    format!("{}: DOY {} - {}", site, start, stop)
}

/// Legend label with the level height truncated to whole metres.
pub fn legend_label(model: ModelName, height: f64) -> String {
    format!("{} @ {} m", model, height.trunc() as i64)
}

/// Split points wherever consecutive times are more than `max_gap` apart.
pub fn split_at_gaps(
    points: &[(NaiveDateTime, f64)],
    max_gap: Duration,
) -> Vec<Vec<(NaiveDateTime, f64)>> {
    let mut segments: Vec<Vec<(NaiveDateTime, f64)>> = Vec::new();
    for &(t, v) in points {
        match segments.last_mut() {
            Some(seg) if seg.last().map_or(false, |(prev, _)| t - *prev <= max_gap) => {
                seg.push((t, v))
            }
            _ => segments.push(vec![(t, v)]),
        }
    }
    segments
}

fn time_range(lines: &[Line]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let mut times = lines
        .iter()
        .flat_map(|l| l.segments.iter().flatten().map(|(t, _)| *t));
    let first = times.next()?;
    let (min, max) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    if min == max {
        Some((min, max + Duration::hours(1)))
    } else {
        Some((min, max))
    }
}

/// Value range padded by a tenth each side; NaN values are ignored.
fn value_range(lines: &[Line]) -> Option<(f64, f64)> {
    let (min, max) = lines
        .iter()
        .flat_map(|l| l.segments.iter().flatten().map(|(_, v)| *v))
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() {
        return None;
    }
    let padding = if (max - min).abs() > 1e-6 {
        (max - min) * 0.1
    } else {
        1.0
    };
    Some((min - padding, max + padding))
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    caption: Option<&str>,
    lines: &[Line],
    x_desc: &str,
    y_desc: &str,
) -> Result<()> {
    let (x0, x1) = time_range(lines).ok_or_else(|| EvalError::NoData(y_desc.to_string()))?;
    let (y0, y1) = value_range(lines).ok_or_else(|| EvalError::NoData(y_desc.to_string()))?;

    let mut builder = ChartBuilder::on(area);
    builder
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70);
    if let Some(caption) = caption {
        builder.caption(caption, ("sans-serif", 30));
    }
    let mut chart = builder
        .build_cartesian_2d(RangedDateTime::from(x0..x1), y0..y1)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_label_formatter(&|dt: &NaiveDateTime| dt.format("%j").to_string())
        .light_line_style(BLACK.mix(0.15))
        .draw()
        .map_err(plot_err)?;

    for line in lines {
        let colour = line.colour;
        for (i, segment) in line.segments.iter().enumerate() {
            let drawn = chart
                .draw_series(LineSeries::new(segment.iter().copied(), colour))
                .map_err(plot_err)?;
            // label only the first segment so the legend has one entry
            if let (0, Some(label)) = (i, &line.label) {
                drawn
                    .label(label.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));
            }
        }
    }

    if lines.iter().any(|l| l.label.is_some()) {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(plot_err)?;
    }
    Ok(())
}

fn model_colour(model: ModelName) -> RGBColor {
    let (r, g, b) = model.colour();
    RGBColor(r, g, b)
}

/// Plot a scalar series, one line per day.
pub fn plot_model_series(series: &ModelSeries, meta: &PlotMeta) -> Result<PathBuf> {
    let path = plot_file_name(
        &meta.save_folder,
        series.variable,
        series.model,
        meta.site,
        meta.start,
        meta.stop,
    );
    let line = Line {
        label: series.level.map(|l| legend_label(series.model, l.height)),
        colour: model_colour(series.model),
        segments: series
            .days
            .values()
            .filter(|d| !d.times.is_empty())
            .map(|d| d.times.iter().copied().zip(d.values.iter().copied()).collect())
            .collect(),
    };
    let y_desc = series.variable.info().labels.first().copied().unwrap_or("");

    {
        let root = BitMapBackend::new(&path, SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        draw_panel(
            &root,
            Some(&plot_title(meta.site, meta.start, meta.stop)),
            &[line],
            "DOY",
            y_desc,
        )?;
        root.present().map_err(plot_err)?;
    }

    info!("Plot saved to {}", path.display());
    Ok(path)
}

/// Plot wind speed over direction in two stacked panels.
pub fn plot_wind_series(series: &WindSeries, meta: &PlotMeta) -> Result<PathBuf> {
    let path = plot_file_name(
        &meta.save_folder,
        Variable::Wind,
        series.model,
        meta.site,
        meta.start,
        meta.stop,
    );
    let colour = model_colour(series.model);
    let days: Vec<_> = series.days.values().filter(|d| !d.times.is_empty()).collect();
    let speed = Line {
        label: None,
        colour,
        segments: days
            .iter()
            .map(|d| d.times.iter().copied().zip(d.speed.iter().copied()).collect())
            .collect(),
    };
    let direction = Line {
        label: series.level.map(|l| legend_label(series.model, l.height)),
        colour,
        segments: days
            .iter()
            .map(|d| d.times.iter().copied().zip(d.direction.iter().copied()).collect())
            .collect(),
    };
    let labels = Variable::Wind.info().labels;

    {
        let root = BitMapBackend::new(&path, WIND_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        let panels = root.split_evenly((2, 1));
        draw_panel(
            &panels[0],
            Some(&plot_title(meta.site, meta.start, meta.stop)),
            &[speed],
            "",
            labels.first().copied().unwrap_or(""),
        )?;
        draw_panel(
            &panels[1],
            None,
            &[direction],
            "DOY",
            labels.get(1).copied().unwrap_or(""),
        )?;
        root.present().map_err(plot_err)?;
    }

    info!("Plot saved to {}", path.display());
    Ok(path)
}

/// Plot every column of a retrieval together.
pub fn plot_retrieval(retrieval: &UkvRetrieval, model: ModelName, meta: &PlotMeta) -> Result<PathBuf> {
    plot_frame(&retrieval.to_frame(), retrieval.variable, model, meta)
}

/// Plot every column of a frame, breaking lines at gaps over an hour.
pub fn plot_frame(
    frame: &Frame,
    variable: Variable,
    model: ModelName,
    meta: &PlotMeta,
) -> Result<PathBuf> {
    let path = meta.save_folder.join(format!(
        "{}_{}_{}_{}_{}_all.png",
        variable, model, meta.site, meta.start, meta.stop
    ));
    let lines: Vec<Line> = frame
        .columns
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let points: Vec<(NaiveDateTime, f64)> = frame.column(name)?.into_iter().collect();
            Some(Line {
                label: Some(name.clone()),
                colour: PALETTE[i % PALETTE.len()],
                segments: split_at_gaps(&points, Duration::hours(1)),
            })
        })
        .collect();
    let y_desc = variable.info().labels.first().copied().unwrap_or("");

    {
        let root = BitMapBackend::new(&path, SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        draw_panel(
            &root,
            Some(&plot_title(meta.site, meta.start, meta.stop)),
            &lines,
            "DOY",
            y_desc,
        )?;
        root.present().map_err(plot_err)?;
    }

    info!("Plot saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 5, 5)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_plot_naming() {
        let start = DoyDate::new(2016, 126).unwrap();
        let stop = DoyDate::new(2016, 130).unwrap();
        let path = plot_file_name(
            Path::new("/plots"),
            Variable::Kdown,
            ModelName::Ukv,
            Site::IMU,
            start,
            stop,
        );
        assert_eq!(path, PathBuf::from("/plots/kdown_ukv_IMU_2016126_2016130.png"));
        assert_eq!(plot_title(Site::IMU, start, stop), "IMU: DOY 2016126 - 2016130");
        assert_eq!(legend_label(ModelName::Ukv, 58.9), "ukv @ 58 m");
    }

    #[test]
    fn test_split_at_gaps() {
        let points = vec![(t(0), 1.0), (t(1), 2.0), (t(5), 3.0), (t(6), 4.0), (t(9), 5.0)];
        let segments = split_at_gaps(&points, Duration::hours(1));
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[2], vec![(t(9), 5.0)]);
        assert!(split_at_gaps(&[], Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_ranges() {
        let line = Line {
            label: None,
            colour: BLUE,
            segments: vec![vec![(t(1), 10.0), (t(2), f64::NAN)], vec![(t(4), 20.0)]],
        };
        assert_eq!(time_range(&[line.clone()]), Some((t(1), t(4))));
        let (lo, hi) = value_range(&[line]).unwrap();
        assert!((lo - 9.0).abs() < 1e-9);
        assert!((hi - 21.0).abs() < 1e-9);

        let flat = Line {
            label: None,
            colour: BLUE,
            segments: vec![vec![(t(3), 5.0)]],
        };
        assert_eq!(time_range(&[flat.clone()]), Some((t(3), t(4))));
        assert_eq!(value_range(&[flat]), Some((4.0, 6.0)));
        assert_eq!(value_range(&[]), None);
    }
}
