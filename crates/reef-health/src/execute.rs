//! Breaker-guarded execution with panic recovery

use crate::circuit_breaker::CircuitBreaker;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

/// Outcome of a guarded call that did not succeed
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// The breaker rejected the call; the operation did not run
    #[error("circuit open: call rejected")]
    Rejected,

    /// The operation returned an error
    #[error("operation failed: {0}")]
    Failed(E),

    /// The operation panicked
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl<E> ExecuteError<E> {
    /// Whether the breaker rejected the call
    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecuteError::Rejected)
    }
}

/// Run `op` under `breaker`, recovering panics
///
/// A `None` breaker never rejects; panics are still recovered. Panics count as
/// failures exactly like returned errors.
pub fn safe_execute<T, E, F>(breaker: Option<&CircuitBreaker>, op: F) -> Result<T, ExecuteError<E>>
where
    F: FnOnce() -> Result<T, E>,
{
    if let Some(b) = breaker {
        if !b.allow() {
            return Err(ExecuteError::Rejected);
        }
    }

    let outcome = match catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ExecuteError::Failed(e)),
        Err(payload) => Err(ExecuteError::Panicked(panic_message(payload))),
    };
    record(breaker, &outcome);
    outcome
}

/// Async form of [`safe_execute`]
pub async fn safe_execute_async<T, E, Fut>(
    breaker: Option<&CircuitBreaker>,
    op: Fut,
) -> Result<T, ExecuteError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    if let Some(b) = breaker {
        if !b.allow() {
            return Err(ExecuteError::Rejected);
        }
    }

    let outcome = match AssertUnwindSafe(op).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ExecuteError::Failed(e)),
        Err(payload) => Err(ExecuteError::Panicked(panic_message(payload))),
    };
    record(breaker, &outcome);
    outcome
}

fn record<T, E>(breaker: Option<&CircuitBreaker>, outcome: &Result<T, ExecuteError<E>>) {
    match outcome {
        Ok(_) => {
            if let Some(b) = breaker {
                b.record_success();
            }
        }
        Err(ExecuteError::Panicked(message)) => {
            error!(
                subject = breaker.map(|b| b.subject()).unwrap_or("-"),
                panic = %message,
                "Recovered panic in guarded operation"
            );
            if let Some(b) = breaker {
                b.record_failure();
            }
        }
        Err(_) => {
            if let Some(b) = breaker {
                if b.record_failure() {
                    warn!(subject = %b.subject(), "Guarded operation tripped its breaker");
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "guarded",
            CircuitBreakerConfig {
                max_failures: 2,
                reset_interval: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_success_and_error() {
        let b = breaker();
        let ok: Result<i32, ExecuteError<String>> = safe_execute(Some(&b), || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err = safe_execute::<i32, _, _>(Some(&b), || Err("boom".to_string())).unwrap_err();
        assert!(matches!(err, ExecuteError::Failed(ref m) if m == "boom"));
        assert_eq!(b.metrics().consecutive_failures, 1);
    }

    #[test]
    fn test_panic_recovered_and_counted() {
        let b = breaker();
        for _ in 0..2 {
            let err = safe_execute::<(), String, _>(Some(&b), || panic!("handler exploded"))
                .unwrap_err();
            assert!(matches!(err, ExecuteError::Panicked(ref m) if m.contains("exploded")));
        }
        assert_eq!(b.state(), CircuitState::Open);

        let mut ran = false;
        let err = safe_execute::<(), String, _>(Some(&b), || {
            ran = true;
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_rejected());
        assert!(!ran);
    }

    #[test]
    fn test_no_breaker_still_recovers() {
        let err = safe_execute::<(), String, _>(None, || panic!("no breaker")).unwrap_err();
        assert!(matches!(err, ExecuteError::Panicked(_)));
    }

    async fn exploding() -> Result<(), String> {
        panic!("async boom")
    }

    #[tokio::test]
    async fn test_async_panic_recovered() {
        let b = breaker();
        let err = safe_execute_async(Some(&b), exploding())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Panicked(ref m) if m.contains("async boom")));
        assert_eq!(b.metrics().failure_count, 1);

        let ok = safe_execute_async::<_, String, _>(Some(&b), async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(b.metrics().consecutive_failures, 0);
    }
}
