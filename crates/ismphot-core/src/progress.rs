/// Pipeline processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    ResolvingIdentity,
    CollectingMetrics,
    Aligning,
    SmoothingShapes,
    Convolving,
    Stacking,
    CalibrationPhotometry,
    Subtracting,
    Ingesting,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolvingIdentity => write!(f, "Resolving frames"),
            Self::CollectingMetrics => write!(f, "Collecting metrics"),
            Self::Aligning => write!(f, "Aligning frames"),
            Self::SmoothingShapes => write!(f, "Smoothing shape coefficients"),
            Self::Convolving => write!(f, "Convolving"),
            Self::Stacking => write!(f, "Stacking"),
            Self::CalibrationPhotometry => write!(f, "Calibration photometry"),
            Self::Subtracting => write!(f, "Subtracting"),
            Self::Ingesting => write!(f, "Ingesting"),
        }
    }
}

/// Thread-safe progress reporting for batch stages.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items in
    /// this stage (e.g., frame count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// Work items completed so far within the current stage.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
