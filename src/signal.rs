use crossbeam_channel::Sender;
use serde::Serialize;

/// Payload of the completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFinished {
    /// `YYYY-MM`
    pub period: String,
    pub batch_id: i64,
    pub row_count: usize,
}

/// Where the orchestrator announces a committed import. Delivery is
/// best-effort; an emitter must not panic and its failures are ignored.
pub trait CompletionSignal: Send + Sync {
    fn emit(&self, event: &ImportFinished);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSignal;

impl CompletionSignal for NoopSignal {
    fn emit(&self, _event: &ImportFinished) {}
}

/// Synchronous callback.
pub struct CallbackSignal<F>(pub F);

impl<F> CompletionSignal for CallbackSignal<F>
where
    F: Fn(&ImportFinished) + Send + Sync,
{
    fn emit(&self, event: &ImportFinished) {
        (self.0)(event)
    }
}

/// Publishes on a channel; a closed or full channel drops the event.
pub struct ChannelSignal {
    tx: Sender<ImportFinished>,
}

impl ChannelSignal {
    pub fn new(tx: Sender<ImportFinished>) -> Self {
        Self { tx }
    }
}

impl CompletionSignal for ChannelSignal {
    fn emit(&self, event: &ImportFinished) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            tracing::debug!(batch_id = event.batch_id, error = %e, "completion signal dropped");
        }
    }
}

/// Logs the event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSignal;

impl CompletionSignal for LogSignal {
    fn emit(&self, event: &ImportFinished) {
        tracing::info!(
            period = %event.period,
            batch_id = event.batch_id,
            rows = event.row_count,
            "import_finished"
        );
    }
}
