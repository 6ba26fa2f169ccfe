use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    Start { cloud: usize },
    Advance { cloud: usize, fraction: f32 },
    Finish { cloud: usize },
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Shared flag a caller flips to stop a running hierarchy build.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Optional cancellation and progress reporting for a build.
#[derive(Clone, Default)]
pub struct RunControl {
    pub cancel: Option<CancelToken>,
    pub progress: Option<ProgressSink>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Forwards `event` to the sink, if any. Advance fractions are clamped to
    /// `[0, 1]`.
    pub fn emit(&self, event: ProgressEvent) {
        let Some(sink) = self.progress.as_ref() else {
            return;
        };
        let event = match event {
            ProgressEvent::Advance { cloud, fraction } => ProgressEvent::Advance {
                cloud,
                fraction: fraction.clamp(0.0, 1.0),
            },
            other => other,
        };
        (sink)(event);
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
