use super::config::StabilizationMode;

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunReport {
    pub mode: StabilizationMode,
    /// Frames emitted to the sink and preview.
    pub frames_processed: usize,
    /// Frame count reported by the source, if known.
    pub frames_in_source: Option<usize>,
    /// Frame pairs whose motion fell back to identity.
    pub degraded_pairs: usize,
    pub trim_ratio: f64,
    pub output_fps: f64,
    /// The run stopped early on a cancel request.
    pub cancelled: bool,
}
