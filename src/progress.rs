//! Progress reporting and cancellation hooks.
//!
//! Engines report percentage progress per stage at least every thousand
//! records and check the cancellation flag at chunk boundaries. Both hooks
//! are optional; a default [`RunHooks`] is inert.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Processing stages surfaced to progress consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SourceFile,
    TargetFile,
    Matching,
    Streaming,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SourceFile => "Processing source file",
            Stage::TargetFile => "Processing target file",
            Stage::Matching => "Matching records",
            Stage::Streaming => "Streaming reconciliation",
            Stage::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Records between forced progress emissions.
pub const PROGRESS_INTERVAL: usize = 1000;

pub type ProgressFn = dyn Fn(u8, Stage) + Send + Sync;

/// Optional progress callback and cancellation flag for one batch.
#[derive(Default)]
pub struct RunHooks {
    progress: Option<Box<ProgressFn>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl RunHooks {
    pub fn new() -> Self {
        RunHooks::default()
    }

    pub fn with_progress(mut self, callback: impl Fn(u8, Stage) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn emit(&self, percent: u8, stage: Stage) {
        if let Some(callback) = &self.progress {
            callback(percent.min(100), stage);
        }
    }

    /// Emits progress for `processed` out of `total` records in a stage.
    pub fn emit_ratio(&self, processed: usize, total: usize, stage: Stage) {
        if total == 0 {
            return;
        }
        let percent = ((processed * 100) / total).min(100) as u8;
        self.emit(percent, stage);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
