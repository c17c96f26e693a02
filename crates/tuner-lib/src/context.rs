use crate::observability::{StructuredLogger, TunerMetrics};
use crate::progress::ProgressBoard;
use crate::settings::TunerSettings;
use std::sync::Arc;

/// Everything a tuning session shares between its components
///
/// Built once by the caller and handed to the supervisor, runner and
/// orchestrator.
#[derive(Clone)]
pub struct TuneContext {
    pub settings: Arc<TunerSettings>,
    pub logger: StructuredLogger,
    pub metrics: TunerMetrics,
    pub progress: ProgressBoard,
}

impl TuneContext {
    pub fn new(settings: TunerSettings, session: impl Into<String>) -> Self {
        Self {
            settings: Arc::new(settings),
            logger: StructuredLogger::new(session),
            metrics: TunerMetrics::new(),
            progress: ProgressBoard::new(),
        }
    }
}
