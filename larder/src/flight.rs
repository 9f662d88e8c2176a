use crate::writer::Erased;
use dashmap::DashMap;
use shared::{ComputeError, Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

type Outcome = std::result::Result<Erased, ComputeError>;

/// Wraps a caller's computation error so it can be shared between joiners.
pub fn compute_error<E>(err: E) -> ComputeError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boxed: Box<dyn std::error::Error + Send + Sync> = err.into();
    ComputeError::from(boxed)
}

/// Per-key registry of computations in progress.
///
/// Concurrent misses on one key share a single computation: the first caller
/// runs its closure, later callers wait for that result instead of running
/// their own. A waiter whose destination type differs from the shared value,
/// or whose flight failed, runs its own closure instead. If the running caller
/// is dropped before finishing, one of the waiters runs its closure in its
/// place.
#[derive(Clone, Default)]
pub struct Flights {
    calls: Arc<DashMap<String, Arc<OnceCell<Outcome>>>>,
}

impl Flights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `compute` for `key`, or joins the flight already running. `T` is
    /// the type the caller will read the value back as.
    pub async fn run<T, F, Fut>(&self, key: &str, compute: F) -> Result<Erased>
    where
        T: 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let cell = self.calls.entry(key.to_owned()).or_default().clone();

        let mut ran = false;
        let mut compute = Some(compute);
        let outcome = {
            let ran = &mut ran;
            let slot = &mut compute;
            cell.get_or_init(move || async move {
                *ran = true;
                match slot.take() {
                    Some(compute) => compute().await,
                    None => Err(compute_error("computation already consumed")),
                }
            })
            .await
            .clone()
        };

        self.calls
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));

        if !ran {
            let fits = matches!(&outcome, Ok(value) if value.downcast_ref::<T>().is_some());
            if !fits {
                if let Some(compute) = compute.take() {
                    debug!(key, "shared result unusable, computing own value");
                    return compute().await.map_err(Error::ComputeFailed);
                }
            }
            debug!(key, "joined in-flight computation");
        }
        outcome.map_err(Error::ComputeFailed)
    }

    /// Number of keys with a computation still registered.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl std::fmt::Debug for Flights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flights")
            .field("in_flight", &self.calls.len())
            .finish()
    }
}
