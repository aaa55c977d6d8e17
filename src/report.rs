// Plot comparison metrics of a sweep against bit-width
use std::path::Path;

use plotters::prelude::*;
use tracing::warn;

use crate::error::{Error, Result};
use crate::quantization::QuantizationMode;
use crate::sweep::SweepReport;

const PALETTE: [RGBColor; 4] = [RED, BLUE, GREEN, MAGENTA];

/// Which metric a sweep chart shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Top1Agreement,
    Snr,
}

impl Metric {
    /// Top-1 agreement when every comparison has it, SNR otherwise.
    pub fn for_report(report: &SweepReport) -> Self {
        let all_classified = report
            .entries
            .iter()
            .filter_map(|e| e.comparison.as_ref())
            .all(|c| c.top1_agreement.is_some());
        if all_classified {
            Metric::Top1Agreement
        } else {
            Metric::Snr
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Metric::Top1Agreement => "Top 1 Agreement (%)",
            Metric::Snr => "SNR (dB)",
        }
    }
}

/// One `(bits, value)` series per mode, sorted by bit-width. Infinite and
/// NaN values are left out.
pub fn series(report: &SweepReport, metric: Metric) -> Vec<(QuantizationMode, Vec<(f32, f32)>)> {
    let mut series: Vec<(QuantizationMode, Vec<(f32, f32)>)> = Vec::new();

    for entry in &report.entries {
        let Some(comparison) = &entry.comparison else {
            continue;
        };
        let value = match metric {
            Metric::Top1Agreement => match comparison.top1_agreement {
                Some(v) => v,
                None => continue,
            },
            Metric::Snr => comparison.snr_db.mean,
        };
        if !value.is_finite() {
            warn!(mode = %entry.mode, nbits = entry.nbits, value, "leaving non-finite value out of the chart");
            continue;
        }

        let point = (entry.nbits as f32, value as f32);
        match series.iter_mut().find(|(mode, _)| *mode == entry.mode) {
            Some((_, points)) => points.push(point),
            None => series.push((entry.mode, vec![point])),
        }
    }

    for (_, points) in &mut series {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    series
}

fn plot_error(e: impl std::fmt::Display) -> Error {
    Error::Plot(e.to_string())
}

/// Render the sweep as an SVG line chart, one line per quantization mode.
pub fn plot_sweep(report: &SweepReport, path: &Path) -> Result<()> {
    let metric = Metric::for_report(report);
    let series = series(report, metric);
    if series.is_empty() {
        return Err(Error::Plot("sweep has no finite comparisons to plot".to_string()));
    }

    let values = series.iter().flat_map(|(_, points)| points.iter().map(|(_, y)| *y));
    let (y_min, y_max) = values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), y| {
        (lo.min(y), hi.max(y))
    });
    let padding = ((y_max - y_min) * 0.1).max(1.0); // keep flat series visible
    let (y_min, y_max) = match metric {
        Metric::Top1Agreement => (0f32, 105f32),
        Metric::Snr => (y_min - padding, y_max + padding),
    };

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("{} vs. Bit-width", metric.label()),
            ("sans-serif", 40).into_font(),
        )
        .margin(30)
        .x_label_area_size(50)
        .y_label_area_size(75)
        .build_cartesian_2d(0f32..17f32, y_min..y_max)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("Bits per weight")
        .y_desc(metric.label())
        .light_line_style(&WHITE.mix(0.8))
        .draw()
        .map_err(plot_error)?;

    for (i, (mode, points)) in series.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        chart
            .draw_series(LineSeries::new(points.iter().cloned(), &color))
            .map_err(plot_error)?
            .label(mode.name())
            .legend(move |(x, y)| PathElement::new(vec![(x - 5, y), (x + 5, y)], &color));

        chart
            .draw_series(points.iter().map(|(x, y)| Circle::new((*x, *y), 3, color.filled())))
            .map_err(plot_error)?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::compare::{ComparisonReport, Stat};
    use crate::sweep::SweepEntry;

    fn entry(mode: QuantizationMode, nbits: u8, agreement: Option<f64>, snr: f64) -> SweepEntry {
        SweepEntry {
            mode,
            nbits,
            path: PathBuf::from(format!("food_{mode}_{nbits}.mlmodel")),
            file_bytes: 100,
            weight_bytes: 60,
            comparison: Some(ComparisonReport {
                output_name: "probabilities".to_string(),
                samples: 5,
                top1_agreement: agreement,
                label_accuracy: Default::default(),
                snr_db: Stat {
                    mean: snr,
                    std_dev: 0.0,
                },
                psnr_db: Stat {
                    mean: snr + 3.0,
                    std_dev: 0.0,
                },
                mse: 0.0,
            }),
        }
    }

    fn report(entries: Vec<SweepEntry>) -> SweepReport {
        SweepReport {
            model: PathBuf::from("food.mlmodel"),
            original_bytes: 400,
            original_weight_bytes: 300,
            original_accuracy: Default::default(),
            entries,
        }
    }

    #[test]
    fn series_grouped_by_mode_and_sorted() {
        let report = report(vec![
            entry(QuantizationMode::Linear, 8, Some(100.0), 40.0),
            entry(QuantizationMode::Linear, 2, Some(60.0), 5.0),
            entry(QuantizationMode::Kmeans, 4, Some(90.0), 20.0),
        ]);

        let series = series(&report, Metric::for_report(&report));

        assert_eq!(2, series.len());
        assert_eq!(QuantizationMode::Linear, series[0].0);
        assert_eq!(vec![(2.0, 60.0), (8.0, 100.0)], series[0].1);
        assert_eq!(vec![(4.0, 90.0)], series[1].1);
    }

    #[test]
    fn regressors_fall_back_to_snr() {
        let report = report(vec![entry(QuantizationMode::LinearLut, 3, None, 12.5)]);

        assert_eq!(Metric::Snr, Metric::for_report(&report));
        assert_eq!(vec![(3.0, 12.5)], series(&report, Metric::Snr)[0].1);
    }

    #[test]
    fn writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.svg");
        let report = report(vec![
            entry(QuantizationMode::Linear, 8, None, 40.0),
            entry(QuantizationMode::Linear, 4, None, 18.0),
            entry(QuantizationMode::Kmeans, 8, None, 42.0),
        ]);

        plot_sweep(&report, &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn infinite_snr_is_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.svg");
        let report = report(vec![
            entry(QuantizationMode::Linear, 8, None, 40.0),
            entry(QuantizationMode::Linear, 1, None, f64::NEG_INFINITY),
            entry(QuantizationMode::Kmeans, 1, None, f64::NAN),
        ]);

        let series = series(&report, Metric::Snr);
        assert_eq!(1, series.len());
        assert_eq!(vec![(8.0, 40.0)], series[0].1);

        plot_sweep(&report, &path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn only_non_finite_values_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = report(vec![entry(QuantizationMode::Linear, 4, None, f64::NEG_INFINITY)]);

        assert!(matches!(
            plot_sweep(&report, &dir.path().join("sweep.svg")),
            Err(Error::Plot(_))
        ));
    }

    #[test]
    fn nothing_to_plot() {
        let dir = tempfile::tempdir().unwrap();
        let mut empty = entry(QuantizationMode::Linear, 8, None, 0.0);
        empty.comparison = None;

        assert!(matches!(
            plot_sweep(&report(vec![empty]), &dir.path().join("sweep.svg")),
            Err(Error::Plot(_))
        ));
    }
}
