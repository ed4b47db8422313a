use std::fs;
use std::path::{Path, PathBuf};

use dirtree_core::WinProbabilities;
use plotters::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::ballots::CandidateSet;
use crate::config::NamedBallot;

const CONFIDENCE_LEVEL: f64 = 0.95;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

/// Everything written to `audit.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub run_id: String,
    pub parameters: ParametersReport,
    pub observed: ObservedReport,
    pub candidates: Vec<CandidateReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub predictive: Vec<NamedBallot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub marginals: Vec<MarginalReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParametersReport {
    pub min_depth: usize,
    pub max_depth: usize,
    pub concentration: f64,
    pub vanilla_equivalent: bool,
    pub elections: usize,
    pub ballots_total: u64,
    pub winners: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservedReport {
    pub ballots: u64,
    pub distinct: usize,
    /// Elimination order of the observed ballots alone, winners last.
    pub order: Option<Vec<String>>,
    pub dirichlet_reducible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub name: String,
    pub wins: u64,
    pub probability: f64,
    pub ci95: (f64, f64),
}

#[derive(Debug, Clone, Serialize)]
pub struct MarginalReport {
    pub ballot: Vec<String>,
    pub observed: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl MarginalReport {
    pub fn from_samples(ballot: Vec<String>, observed: u64, samples: &[f64]) -> Self {
        let (mean, min, max) = if samples.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                samples.iter().sum::<f64>() / samples.len() as f64,
                samples.iter().copied().fold(f64::INFINITY, f64::min),
                samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };
        Self {
            ballot,
            observed,
            mean,
            min,
            max,
        }
    }
}

/// Per-candidate rows with Wilson score intervals.
pub fn candidate_reports(
    candidates: &CandidateSet,
    result: &WinProbabilities,
) -> Vec<CandidateReport> {
    let z = Normal::new(0.0, 1.0)
        .map(|normal| normal.inverse_cdf(0.5 + CONFIDENCE_LEVEL / 2.0))
        .unwrap_or(1.96);
    result
        .win_counts
        .iter()
        .zip(&result.probabilities)
        .enumerate()
        .map(|(idx, (&wins, &probability))| CandidateReport {
            name: candidates.name(idx).to_string(),
            wins,
            probability,
            ci95: wilson_interval(probability, result.n_elections, z),
        })
        .collect()
}

fn wilson_interval(p: f64, n: usize, z: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 1.0);
    }
    let n = n as f64;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let centre = (p + z2 / (2.0 * n)) / denom;
    let margin = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;
    ((centre - margin).min(p).max(0.0), (centre + margin).max(p).min(1.0))
}

impl AuditReport {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        fs::write(path.as_ref(), body).map_err(|e| ReportError::Io {
            context: "writing audit json",
            source: e,
        })
    }

    pub fn write_markdown(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let p = &self.parameters;
        let mut rows = String::new();
        rows.push_str(&format!("# Posterior Audit: {}\n\n", self.run_id));
        rows.push_str(&format!(
            "{} simulated elections of {} ballots ({} observed), {} winner{}.\n\n",
            p.elections,
            p.ballots_total,
            self.observed.ballots,
            p.winners,
            if p.winners == 1 { "" } else { "s" }
        ));
        if let Some(order) = &self.observed.order {
            rows.push_str(&format!(
                "Observed elimination order: {}\n\n",
                order.join(" → ")
            ));
        }
        rows.push_str("| Candidate | Wins | Win probability | 95% CI |\n");
        rows.push_str("|-----------|------|-----------------|--------|\n");
        for candidate in &self.candidates {
            rows.push_str(&format!(
                "| {name} | {wins} | {prob:.4} | [{low:.4}, {high:.4}] |\n",
                name = candidate.name,
                wins = candidate.wins,
                prob = candidate.probability,
                low = candidate.ci95.0,
                high = candidate.ci95.1,
            ));
        }
        if !self.observed.dirichlet_reducible {
            rows.push_str(
                "\nObserved ballots shorter than min_depth: the prior is not a flat Dirichlet.\n",
            );
        }

        fs::write(path.as_ref(), rows).map_err(|e| ReportError::Io {
            context: "writing summary markdown",
            source: e,
        })
    }

    pub fn render_plot(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ReportError> {
        let dir = dir.as_ref();
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|e| ReportError::Io {
                context: "creating plots directory",
                source: e,
            })?;
        }

        let output_path = dir.join("win_probability.png");
        let candidates = self.candidates.clone();

        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));

        let plot_attempt = std::panic::catch_unwind(move || {
            let root = BitMapBackend::new(&output_path, (800, 480)).into_drawing_area();
            root.fill(&WHITE)
                .map_err(|e| ReportError::Plot(e.to_string()))?;

            let mut chart = ChartBuilder::on(&root)
                .margin(20)
                .caption("Posterior win probability", ("sans-serif", 22))
                .set_label_area_size(LabelAreaPosition::Left, 50)
                .set_label_area_size(LabelAreaPosition::Bottom, 60)
                .build_cartesian_2d(0..candidates.len(), 0.0f64..1.0)
                .map_err(|e| ReportError::Plot(e.to_string()))?;

            chart
                .configure_mesh()
                .disable_mesh()
                .y_desc("P(win)")
                .x_desc("Candidate")
                .x_label_formatter(&|idx| {
                    candidates
                        .get(*idx)
                        .map(|c| c.name.clone())
                        .unwrap_or_default()
                })
                .draw()
                .map_err(|e| ReportError::Plot(e.to_string()))?;

            chart
                .draw_series(candidates.iter().enumerate().map(|(idx, c)| {
                    Rectangle::new([(idx, 0.0), (idx + 1, c.probability)], BLUE.filled())
                }))
                .map_err(|e| ReportError::Plot(e.to_string()))?;

            chart
                .draw_series(candidates.iter().enumerate().map(|(idx, c)| {
                    PathElement::new(
                        vec![(idx, c.ci95.0), (idx, c.ci95.1)],
                        BLACK.stroke_width(2),
                    )
                }))
                .map_err(|e| ReportError::Plot(e.to_string()))?;

            drop(chart);

            root.present()
                .map_err(|e| ReportError::Plot(e.to_string()))?;

            drop(root);

            Ok(output_path)
        });

        std::panic::set_hook(prev_hook);

        match plot_attempt {
            Ok(result) => result,
            Err(_) => Err(ReportError::Plot(
                "plotters panicked while rendering (missing font support?)".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> WinProbabilities {
        WinProbabilities {
            n_elections: 200,
            n_winners: 1,
            win_counts: vec![150, 50, 0],
            probabilities: vec![0.75, 0.25, 0.0],
        }
    }

    fn candidates() -> CandidateSet {
        CandidateSet::new(&["Alice".to_string(), "Bob".to_string(), "Carol".to_string()])
    }

    #[test]
    fn intervals_bracket_the_estimate() {
        let rows = candidate_reports(&candidates(), &result());
        assert_eq!(rows[0].name, "Alice");
        for row in &rows {
            assert!(row.ci95.0 <= row.probability && row.probability <= row.ci95.1);
            assert!(row.ci95.0 >= 0.0 && row.ci95.1 <= 1.0);
        }
        // Zero wins still leave some upper mass.
        assert!(rows[2].ci95.1 > 0.0);
        assert!(rows[2].ci95.0 < 1e-12);
    }

    #[test]
    fn marginal_summary_handles_empty_samples() {
        let empty = MarginalReport::from_samples(vec!["Alice".into()], 3, &[]);
        assert_eq!(empty.mean, 0.0);
        let some = MarginalReport::from_samples(vec!["Alice".into()], 3, &[0.2, 0.4]);
        assert!((some.mean - 0.3).abs() < 1e-12);
        assert_eq!((some.min, some.max), (0.2, 0.4));
    }

    #[test]
    fn markdown_lists_every_candidate() {
        let dir = tempfile::tempdir().expect("temp dir");
        let report = AuditReport {
            run_id: "unit".into(),
            parameters: ParametersReport {
                min_depth: 0,
                max_depth: 3,
                concentration: 1.0,
                vanilla_equivalent: false,
                elections: 200,
                ballots_total: 1000,
                winners: 1,
                workers: 2,
            },
            observed: ObservedReport {
                ballots: 100,
                distinct: 4,
                order: Some(vec!["Carol".into(), "Bob".into(), "Alice".into()]),
                dirichlet_reducible: true,
            },
            candidates: candidate_reports(&candidates(), &result()),
            predictive: Vec::new(),
            marginals: Vec::new(),
        };
        let path = dir.path().join("summary.md");
        report.write_markdown(&path).expect("markdown written");
        let text = fs::read_to_string(&path).expect("readable");
        for name in ["Alice", "Bob", "Carol"] {
            assert!(text.contains(&format!("| {name} |")));
        }
        assert!(text.contains("Carol → Bob → Alice"));

        let json_path = dir.path().join("audit.json");
        report.write_json(&json_path).expect("json written");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(json_path).expect("readable")).expect("json");
        assert!(value.get("predictive").is_none());
        assert_eq!(value["candidates"][0]["wins"], 150);
    }
}
