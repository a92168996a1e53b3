use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// Errors that can tell a lost optimistic-concurrency race apart from a real failure.
pub trait Conflict {
    fn is_conflict(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Total number of attempts, the first one included.
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
}

/// Five attempts, 10ms apart with up to 10% jitter.
pub const DEFAULT_RETRY: Backoff = Backoff {
    steps: 5,
    duration: Duration::from_millis(10),
    factor: 1.0,
    jitter: 0.1,
};

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.duration.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter = if self.jitter > 0.0 {
            base * self.jitter * rand::random::<f64>()
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }
}

/// Read-modify-write loop. `fetch` loads the current value together with its
/// version, `mutate` edits it in place and `write` stores it conditionally on
/// the version. A write rejected as a conflict starts over from `fetch`; any
/// other error, or a conflict on the last attempt, is returned.
pub async fn retry_on_conflict<T, V, E, F, FFut, M, W, WFut>(
    backoff: Backoff,
    mut fetch: F,
    mut mutate: M,
    mut write: W,
) -> Result<(), E>
where
    E: Conflict,
    F: FnMut() -> FFut,
    FFut: Future<Output = Result<(T, V), E>>,
    M: FnMut(&mut T),
    W: FnMut(T, V) -> WFut,
    WFut: Future<Output = Result<(), E>>,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0;
    loop {
        let (mut value, version) = fetch().await?;
        mutate(&mut value);
        match write(value, version).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() && attempt + 1 < steps => {
                let delay = backoff.delay(attempt);
                debug!("write conflict on attempt {}, retrying in {delay:?}", attempt + 1);
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Conflict,
        Broken,
    }

    impl Conflict for TestError {
        fn is_conflict(&self) -> bool {
            matches!(self, TestError::Conflict)
        }
    }

    const FAST: Backoff = Backoff {
        steps: 3,
        duration: Duration::from_millis(1),
        factor: 1.0,
        jitter: 0.0,
    };

    #[tokio::test]
    async fn gives_up_after_configured_steps() {
        let writes = Cell::new(0);
        let res = retry_on_conflict(
            FAST,
            || async { Ok::<_, TestError>((0u32, 0u32)) },
            |v| *v += 1,
            |_, _| {
                writes.set(writes.get() + 1);
                async { Err(TestError::Conflict) }
            },
        )
        .await;
        assert_eq!(res, Err(TestError::Conflict));
        assert_eq!(writes.get(), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let writes = Cell::new(0);
        let res = retry_on_conflict(
            FAST,
            || async { Ok::<_, TestError>(((), ())) },
            |_| {},
            |_, _| {
                writes.set(writes.get() + 1);
                async { Err(TestError::Broken) }
            },
        )
        .await;
        assert_eq!(res, Err(TestError::Broken));
        assert_eq!(writes.get(), 1);
    }

    #[tokio::test]
    async fn refetches_after_conflict() {
        let fetches = Cell::new(0u32);
        let res = retry_on_conflict(
            FAST,
            || {
                fetches.set(fetches.get() + 1);
                let version = fetches.get();
                async move { Ok::<_, TestError>((String::new(), version)) }
            },
            |v| v.push_str("x"),
            |value, version| async move {
                assert_eq!(value, "x");
                if version < 2 {
                    Err(TestError::Conflict)
                } else {
                    Ok(())
                }
            },
        )
        .await;
        assert!(res.is_ok());
        assert_eq!(fetches.get(), 2);
    }

    #[test]
    fn delay_stays_within_jitter_bound() {
        for attempt in 0..4 {
            let d = DEFAULT_RETRY.delay(attempt);
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(11));
        }
    }
}
