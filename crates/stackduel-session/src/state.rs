use std::sync::Arc;

use tokio::sync::Mutex;

use stackduel_store::client::{StoreClient, StoreClientError};

use crate::launcher::Launcher;
use crate::registry::{Registry, SessionError};

/// Shared handles cloned into every connection worker.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Mutex<Registry>>,
    pub store: StoreClient,
    pub launcher: Arc<Mutex<Launcher>>,
    /// Host clients are told to reach match servers on.
    pub advertise_host: String,
}

impl AppState {
    pub fn new(store: StoreClient, launcher: Launcher, advertise_host: String) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::new())),
            store,
            launcher: Arc::new(Mutex::new(launcher)),
            advertise_host,
        }
    }
}

const STORE_ATTEMPTS: usize = 3;

/// Run a persistence call with bounded retries on transient failures,
/// reconnecting the shared client between attempts. Business verdicts
/// (`NotFound`, `Conflict`, ...) return immediately.
pub async fn with_store_retries<T, F, Fut>(
    store: &StoreClient,
    mut op: F,
) -> Result<T, SessionError>
where
    F: FnMut(StoreClient) -> Fut,
    Fut: Future<Output = Result<T, StoreClientError>>,
{
    let mut last: Option<StoreClientError> = None;
    for attempt in 0..STORE_ATTEMPTS {
        if attempt > 0 {
            let _ = store.reconnect().await;
        }
        match op(store.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                tracing::warn!(attempt, error = %e, "persistence call failed, retrying");
                last = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last.map(SessionError::from).unwrap_or_else(|| {
        SessionError::new(
            stackduel_core::error::ErrorKind::PersistenceUnavailable,
            "persistence unavailable",
        )
    }))
}
