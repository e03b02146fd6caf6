pub mod visualization;

use serde::Serialize;

use crate::{CloningResult, FullAnalysisReport, SRegion};

#[derive(Serialize)]
pub struct JsonReport {
    pub source: Option<String>,
    pub copy_move_analysis: CopyMoveReportSection,
    pub resampling_analysis: ResamplingReportSection,
}

#[derive(Serialize)]
pub struct CopyMoveReportSection {
    pub cloning: CloningResult,
    pub cluster_sizes: Vec<usize>,
    /// Mean query-to-train displacement of each cluster, in pixels.
    pub cluster_offsets: Vec<(f64, f64)>,
}

#[derive(Serialize)]
pub struct ResamplingReportSection {
    pub mean_probability: f64,
    pub iterations: usize,
    pub converged: bool,
    pub coefficients: Vec<f64>,
    pub analyzed_region: SRegion,
    pub spectrum_computed: bool,
}

impl From<&FullAnalysisReport> for JsonReport {
    fn from(report: &FullAnalysisReport) -> Self {
        let copy_move = &report.copy_move;
        let resampling = &report.resampling;

        Self {
            source: report.source.clone(),
            copy_move_analysis: CopyMoveReportSection {
                cloning: copy_move.stats,
                cluster_sizes: copy_move.clusters.iter().map(|c| c.len()).collect(),
                cluster_offsets: copy_move
                    .clusters
                    .iter()
                    .map(|c| c.mean_offset(&copy_move.keypoints))
                    .collect(),
            },
            resampling_analysis: ResamplingReportSection {
                mean_probability: resampling.mean_probability,
                iterations: resampling.iterations,
                converged: resampling.converged,
                coefficients: resampling.coefficients.to_vec(),
                analyzed_region: resampling.analyzed_region,
                spectrum_computed: resampling.spectrum.is_some(),
            },
        }
    }
}

impl JsonReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
