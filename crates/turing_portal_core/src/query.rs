//! crates/turing_portal_core/src/query.rs
//!
//! A small keyed query cache: fresh values are served from memory, concurrent
//! requests for the same key share a single in-flight fetch, and failures are
//! retried a bounded number of times unless they are auth failures.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::ports::{PortError, PortResult};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_LIMIT: u32 = 1;

/// Identifies one cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Projects,
    Datasets(String),
    Activities(String),
    Results(String),
}

impl QueryKey {
    /// The project this key belongs to, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            QueryKey::Projects => None,
            QueryKey::Datasets(id) | QueryKey::Activities(id) | QueryKey::Results(id) => Some(id),
        }
    }
}

type CachedValue = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, PortResult<CachedValue>>>;

#[derive(Default)]
struct Slot {
    value: Option<CachedValue>,
    fetched_at: Option<Instant>,
    in_flight: Option<InFlight>,
}

pub struct QueryCache {
    slots: Mutex<HashMap<QueryKey, Slot>>,
    stale_after: Duration,
    retry_limit: u32,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER, DEFAULT_RETRY_LIMIT)
    }
}

impl QueryCache {
    pub fn new(stale_after: Duration, retry_limit: u32) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            stale_after,
            retry_limit,
        }
    }

    /// Returns the cached value for `key` when it is still fresh; otherwise runs
    /// `fetcher` (or joins a fetch already in flight for the same key).
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> PortResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PortResult<T>> + Send + 'static,
    {
        let in_flight = {
            let mut slots = self.lock_slots()?;
            let slot = slots.entry(key.clone()).or_default();

            let fresh = slot
                .fetched_at
                .map(|at| at.elapsed() < self.stale_after)
                .unwrap_or(false);
            if fresh {
                if let Some(value) = &slot.value {
                    debug!("Query cache hit for {:?}", key);
                    return downcast(value.clone());
                }
            }

            match &slot.in_flight {
                Some(shared) => shared.clone(),
                None => {
                    let shared = run_with_retries(fetcher, self.retry_limit).boxed().shared();
                    slot.in_flight = Some(shared.clone());
                    shared
                }
            }
        };

        let outcome = in_flight.clone().await;

        {
            let mut slots = self.lock_slots()?;
            let slot = slots.entry(key.clone()).or_default();
            // Only the fetch that is still registered may settle the slot.
            let is_current = slot
                .in_flight
                .as_ref()
                .map(|current| current.ptr_eq(&in_flight))
                .unwrap_or(false);
            if is_current {
                slot.in_flight = None;
                if let Ok(value) = &outcome {
                    slot.value = Some(value.clone());
                    slot.fetched_at = Some(Instant::now());
                }
            }
        }

        downcast(outcome?)
    }

    /// Marks `key` stale so the next fetch goes to the backend.
    pub fn invalidate(&self, key: &QueryKey) {
        if let Ok(mut slots) = self.slots.lock() {
            if let Some(slot) = slots.get_mut(key) {
                slot.fetched_at = None;
            }
        }
    }

    /// Marks every key belonging to `project_id` stale, and the project list too.
    pub fn invalidate_project(&self, project_id: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            for (key, slot) in slots.iter_mut() {
                if key.project_id() == Some(project_id) || *key == QueryKey::Projects {
                    slot.fetched_at = None;
                }
            }
        }
    }

    fn lock_slots(&self) -> PortResult<std::sync::MutexGuard<'_, HashMap<QueryKey, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| PortError::Unexpected("query cache lock poisoned".to_string()))
    }
}

async fn run_with_retries<T, F, Fut>(fetcher: F, retry_limit: u32) -> PortResult<CachedValue>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PortResult<T>> + Send + 'static,
{
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(Arc::new(value) as CachedValue),
            Err(e) if e.is_terminal() || attempt >= retry_limit => return Err(e),
            Err(e) => {
                attempt += 1;
                warn!("Query failed, retrying ({}/{}): {}", attempt, retry_limit, e);
            }
        }
    }
}

fn downcast<T: Send + Sync + 'static>(value: CachedValue) -> PortResult<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| PortError::Unexpected("cached value has an unexpected type".to_string()))
}
