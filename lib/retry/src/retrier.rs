use std::fmt::Display;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{Classify, Error, RetryPolicy, Versioned, VersionedStore};

/// Re-runs an operation while it fails with a version conflict.
///
/// A `Retrier` holds no state between calls, one instance can drive any
/// number of concurrent `execute` calls, each with its own attempt counter.
#[derive(Clone, Debug, Default)]
pub struct Retrier {
    policy: RetryPolicy,
    cancellation: Option<CancellationToken>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Retrier {
            policy,
            cancellation: None,
        }
    }

    /// Abort with [`Error::Cancelled`] once `token` is cancelled. The token is
    /// checked before every attempt and while waiting between attempts.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Invoke `operation` until it succeeds, fails with anything but a
    /// conflict, or `max_attempts` is reached.
    ///
    /// `operation` must redo the whole read-modify-write sequence, nothing is
    /// carried over from a failed attempt.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, Error<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.policy.validate().map_err(Error::InvalidConfiguration)?;

        let max_attempts = self.policy.max_attempts();
        let mut attempts = 0;

        loop {
            if self.is_cancelled() {
                debug!(message = "retry cancelled before attempt", attempts);
                return Err(Error::Cancelled { attempts });
            }

            attempts += 1;
            trace!(message = "attempting operation", attempt = attempts, max_attempts);

            let err = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(message = "operation succeeded after conflicts", attempts);
                    }

                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_conflict() {
                debug!(
                    message = "non-retryable error",
                    attempts,
                    kind = %err.kind(),
                    %err
                );

                return Err(Error::Failed {
                    attempts,
                    source: err,
                });
            }

            if attempts >= max_attempts {
                warn!(
                    message = "conflict retries exhausted",
                    attempts,
                    %err
                );

                return Err(Error::Exhausted {
                    attempts,
                    source: err,
                });
            }

            let delay = self.policy.delay(attempts);
            debug!(
                message = "write conflict, retrying",
                attempt = attempts,
                delay_ms = %delay.as_millis(),
                %err
            );

            if self.is_cancelled() {
                return Err(Error::Cancelled { attempts });
            }

            if delay.is_zero() {
                continue;
            }

            match &self.cancellation {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(message = "retry cancelled during backoff", attempts);
                            return Err(Error::Cancelled { attempts });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Fetch the object identified by `key`, apply `mutate` to it and write
    /// it back, re-fetching and re-applying from scratch on every conflict.
    ///
    /// `mutate` may run once per attempt, so it must depend only on the
    /// freshly fetched object.
    pub async fn update<S, F>(
        &self,
        store: &S,
        key: &S::Key,
        mutate: F,
    ) -> Result<S::Object, Error<S::Error>>
    where
        S: VersionedStore,
        F: FnMut(&mut S::Object) -> Result<(), S::Error> + Send,
    {
        let mutate = &Mutex::new(mutate);

        self.execute(move || async move {
            let mut object = store.fetch(key).await?;
            trace!(
                message = "fetched object",
                ?key,
                resource_version = object.resource_version()
            );

            {
                let mut mutate = mutate.lock().unwrap_or_else(PoisonError::into_inner);
                (*mutate)(&mut object)?;
            }

            store.write(object).await
        })
        .await
    }
}
