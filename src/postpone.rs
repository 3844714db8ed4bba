use std::time::Duration;

use crate::Context;

/// Timeout given to a detached context when the original carried no deadline.
pub const DEFAULT_POSTPONE_TIMEOUT: Duration = Duration::from_secs(15);

/// Snapshot of a request context taken before the chain is called, so that a
/// rollback can run later even if the original context has expired by then.
#[derive(Debug, Clone)]
pub struct Postponed {
    ctx: Context,
    timeout: Duration,
}

impl Postponed {
    /// Capture the values of `ctx` and the time it had left at this point.
    pub fn capture(ctx: &Context) -> Self {
        let timeout = ctx
            .remaining()
            .filter(|remaining| !remaining.is_zero())
            .unwrap_or(DEFAULT_POSTPONE_TIMEOUT);
        Self {
            ctx: ctx.clone().without_deadline(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A fresh context with the captured values and its own deadline, starting now.
    pub fn detach(&self) -> Context {
        self.ctx.clone().with_timeout(self.timeout)
    }
}
