//! Search progress visualization.
//!
//! Two modes:
//! - **Live terminal**: Unicode sparklines of the acceptance score and the
//!   incumbent's OOD / worst-group accuracy after each step
//! - **PNG export**: the same series charted via plotters (optional feature)

#[cfg(feature = "plotters")]
use plotters::prelude::*;

use owo_colors::OwoColorize;

use super::engine::{CandidateOutcome, StepReport};

/// Live progress display for the terminal.
#[derive(Debug, Default)]
pub struct LiveProgress {
    score_history: Vec<f64>,
    ood_history: Vec<f64>,
    wga_history: Vec<f64>,
    accepted_history: Vec<usize>,
}

impl LiveProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: &StepReport) {
        self.score_history.push(report.acceptance_score);
        self.ood_history.push(report.incumbent_ood.unwrap_or(f64::NAN));
        self.wga_history.push(report.incumbent_wga.unwrap_or(f64::NAN));
        self.accepted_history.push(
            report
                .candidates
                .iter()
                .filter(|c| c.outcome == CandidateOutcome::Accepted)
                .count(),
        );
    }

    pub fn steps(&self) -> usize {
        self.score_history.len()
    }

    /// Render a sparkline; NaN points render as blanks.
    pub fn sparkline(values: &[f64], width: usize) -> String {
        if values.is_empty() {
            return " ".repeat(width);
        }

        let chars = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let min = finite.clone().fold(f64::INFINITY, f64::min);
        let max = finite.fold(f64::NEG_INFINITY, f64::max);
        let range = (max - min).max(0.001);

        let mut result = String::new();
        for i in 0..width {
            let idx = if values.len() <= width {
                (i < values.len()).then_some(i)
            } else {
                Some(i * values.len() / width)
            };

            match idx.map(|idx| values[idx]) {
                Some(v) if v.is_finite() => {
                    let normalized = (v - min) / range;
                    let char_idx = ((normalized * 7.0).round() as usize).min(7);
                    result.push(chars[char_idx]);
                }
                _ => result.push(' '),
            }
        }
        result
    }

    /// One-line status for the step just finished.
    pub fn display(&self, step: usize, total: usize) {
        let width = 20;
        let mut line = format!("S{:2}/{} ", step, total);

        if let Some(last) = self.score_history.last() {
            line.push_str(&format!(
                "Judge[{}]{:.3} ",
                Self::sparkline(&self.score_history, width),
                last
            ));
        }
        if let Some(last) = self.wga_history.last().filter(|v| v.is_finite()) {
            line.push_str(&format!(
                "WGA[{}]{:.3} ",
                Self::sparkline(&self.wga_history, width),
                last
            ));
        }
        if let Some(n) = self.accepted_history.last() {
            if *n > 0 {
                line.push_str(&format!("{}", "⚡improved".green()));
            }
        }
        println!("{}", line);
    }

    /// Print the full-width sparklines and first → last deltas.
    pub fn final_summary(&self) {
        println!();
        println!("{}", " SEARCH COMPLETE ".bold().on_green());
        println!();

        for (label, series) in [
            ("Judge", &self.score_history),
            ("OOD", &self.ood_history),
            ("WGA", &self.wga_history),
        ] {
            let finite: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
            let (Some(first), Some(last)) = (finite.first(), finite.last()) else {
                continue;
            };
            let delta = last - first;
            let (arrow, delta_str) = if delta > 0.0 {
                ("↑", format!("{:+.4}", delta).green().to_string())
            } else if delta < 0.0 {
                ("↓", format!("{:+.4}", delta).red().to_string())
            } else {
                ("→", format!("{:+.4}", delta).dimmed().to_string())
            };
            println!(
                "  {:>5}: {:.4} {} {:.4}  ({})",
                label.bold(),
                first,
                arrow,
                last,
                delta_str
            );
            println!("         [{}]", Self::sparkline(series, 40).cyan());
        }

        let accepted: usize = self.accepted_history.iter().sum();
        println!("  {} candidates accepted over {} steps", accepted, self.steps());
        println!();
    }
}

/// Chart the acceptance score and incumbent metrics per step.
#[cfg(feature = "plotters")]
pub fn plot_search_progress(
    reports: &[StepReport],
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let n = reports.len();
    if n == 0 {
        return Ok(());
    }

    let root = BitMapBackend::new(output_path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let series = |f: &dyn Fn(&StepReport) -> Option<f64>| -> Vec<(f64, f64)> {
        reports
            .iter()
            .filter_map(|r| f(r).filter(|v| v.is_finite()).map(|v| (r.step as f64, v)))
            .collect()
    };
    let judge = series(&|r| Some(r.acceptance_score));
    let ood = series(&|r| r.incumbent_ood);
    let wga = series(&|r| r.incumbent_wga);

    let mut chart = ChartBuilder::on(&root)
        .caption("Strategy Search Progress", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0.0..(n as f64), 0.0..1.0)?;

    chart.configure_mesh().x_desc("step").draw()?;

    for (label, points, color) in [
        ("Acceptance score", &judge, GREEN),
        ("Incumbent OOD acc", &ood, BLUE),
        ("Incumbent WGA", &wga, MAGENTA),
    ] {
        chart
            .draw_series(LineSeries::new(points.clone(), &color))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        chart.draw_series(points.iter().map(|(x, y)| Circle::new((*x, *y), 4, color.filled())))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .draw()?;

    root.present()?;
    println!("Saved search chart to {}", output_path);
    Ok(())
}

/// Stub when plotters feature is disabled.
#[cfg(not(feature = "plotters"))]
pub fn plot_search_progress(
    _reports: &[StepReport],
    _output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Plotting requires --features plotters");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::advisors::AdvisorNotes;

    fn report(step: usize, score: f64, wga: Option<f64>) -> StepReport {
        StepReport {
            step,
            proposer: "heuristic".into(),
            fallback_reason: None,
            rationale: None,
            candidates: vec![],
            incumbent: Some("x".into()),
            incumbent_ood: Some(0.6),
            incumbent_wga: wga,
            acceptance_score: score,
            notes: AdvisorNotes::default(),
        }
    }

    #[test]
    fn test_sparkline_shape() {
        let line = LiveProgress::sparkline(&[0.0, 0.5, 1.0], 5);
        assert_eq!(line.chars().count(), 5);
        assert!(line.starts_with('▁'));
        assert_eq!(line.chars().nth(2), Some('█'));
        assert!(line.ends_with("  "));
    }

    #[test]
    fn test_sparkline_skips_nan() {
        let line = LiveProgress::sparkline(&[0.2, f64::NAN, 0.4], 3);
        assert_eq!(line.chars().nth(1), Some(' '));
    }

    #[test]
    fn test_record_steps() {
        let mut progress = LiveProgress::new();
        progress.record(&report(0, 0.4, None));
        progress.record(&report(1, 0.6, Some(0.55)));
        assert_eq!(progress.steps(), 2);
        assert!(progress.wga_history[0].is_nan());
    }
}
