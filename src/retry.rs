use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;

use crate::prelude::*;

/// Tells the retry helper whether a failure is a transient "resource exhausted" condition
/// (quota, throttling, retryable write conflict). Everything else is propagated immediately.
pub trait Exhaustion {
    fn is_resource_exhausted(&self) -> bool;
}

/// Bounded exponential backoff around remote calls.
///
/// The `n`-th retry (counting from zero) waits `base_delay * 2^n`. An operation is attempted at
/// most `max_attempts` times; a `max_attempts` of zero still runs it once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl Backoff {
    /// The waits between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.base_delay;

        (0..self.max_attempts.saturating_sub(1))
            .map(move |attempt| base.saturating_mul(2u32.saturating_pow(attempt)))
    }

    /// Run `action`, retrying while it fails with resource exhaustion and attempts remain.
    ///
    /// When every attempt is exhausted the last error is returned to the caller.
    pub async fn run<A, F, T, E>(&self, action: A) -> Result<T, E>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, E>>,
        E: Exhaustion,
    {
        // the strategy is only advanced when a retry is about to happen
        let strategy = self.delays().enumerate().map(|(index, delay)| {
            tracing::warn!(
                attempt = index + 1,
                ?delay,
                "retry attempt {} due to resource exhaustion",
                index + 1
            );
            delay
        });

        RetryIf::start(strategy, action, |err: &E| err.is_resource_exhausted()).await
    }
}
