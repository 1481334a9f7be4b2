use std::sync::Arc;
use std::sync::mpsc::SyncSender;

#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    StatusUpdate { text: String },
    Message(String),

    /// Diagnostics of one refinement step of run `run`.
    Step {
        run: usize,
        step: usize,
        chi2: f64,
        rg: f64,
        support_volume: f64,
    },
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Cheaply clonable handle used by every stage and worker to report progress.
#[derive(Default, Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Forwards events to a bounded channel without ever blocking the sender; events
    /// are dropped while the channel is full or after the receiver is gone.
    pub fn with_channel(sender: SyncSender<Progress>) -> Self {
        Self::with_callback(Arc::new(move |event| {
            let _ = sender.try_send(event);
        }))
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    pub fn is_silent(&self) -> bool {
        self.callback.is_none()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn callback_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::with_callback(Arc::new(move |event| {
            if let Progress::Message(text) = event {
                sink.lock().unwrap().push(text);
            }
        }));
        reporter.report(Progress::Message("hello".into()));
        reporter.clone().report(Progress::Message("again".into()));
        assert_eq!(*seen.lock().unwrap(), vec!["hello", "again"]);
    }

    #[test]
    fn full_channel_drops_events_instead_of_blocking() {
        let (tx, rx) = sync_channel(1);
        let reporter = ProgressReporter::with_channel(tx);
        reporter.report(Progress::TaskIncrement);
        reporter.report(Progress::TaskIncrement);
        reporter.report(Progress::TaskFinish);
        assert!(matches!(rx.try_recv(), Ok(Progress::TaskIncrement)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn silent_reporter_ignores_events() {
        let reporter = ProgressReporter::new();
        assert!(reporter.is_silent());
        reporter.report(Progress::PhaseFinish);
    }
}
