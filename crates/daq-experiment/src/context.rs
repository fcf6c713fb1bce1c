//! Shared run context: the clock every wait goes through and the token that
//! can cancel it.

use daq_core::clock::{cancellable_sleep, CancellationToken, Clock, TokioClock};
use daq_core::error::AppResult;
use std::sync::Arc;
use std::time::Duration;

/// Clock and cancellation token shared by the sequencer, the pulse-train
/// dispatcher and the procedures of one experiment invocation.
///
/// Clones share both the timeline and the cancellation signal, so cancelling
/// through any clone stops every component holding one.
#[derive(Clone)]
pub struct RunContext {
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token (e.g. to share one across contexts)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// `SequenceAbort` if cancellation was requested
    pub fn check(&self, context: &str) -> AppResult<()> {
        self.cancel.check(context)
    }

    /// Cancellable settle delay
    pub async fn settle(&self, duration: Duration, context: &str) -> AppResult<()> {
        tracing::debug!(?duration, context, "Settling");
        cancellable_sleep(self.clock.as_ref(), &self.cancel, duration, context).await
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Arc::new(TokioClock::new()))
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("now", &self.clock.now())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
