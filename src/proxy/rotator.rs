use std::sync::Arc;
use tokio::sync::Mutex;

use super::pool::{ProxyEntry, ProxyPool};

#[derive(Debug, Default)]
struct RotatorState {
    current: Option<ProxyEntry>,
    uses: u32,
}

/// Request-scoped wrapper over the pool: hold one proxy for `rotate_every`
/// requests instead of rotating per request, trading validation overhead
/// for session affinity.
pub struct ProxyRotator {
    pool: Arc<ProxyPool>,
    rotate_every: u32,
    state: Mutex<RotatorState>,
}

impl ProxyRotator {
    pub fn new(pool: Arc<ProxyPool>, rotate_every: u32) -> Self {
        Self {
            pool,
            rotate_every: rotate_every.max(1),
            state: Mutex::new(RotatorState::default()),
        }
    }

    /// The proxy to use for the next request; draws a fresh one from the
    /// pool every `rotate_every` uses. `None` means direct access.
    pub async fn current(&self) -> Option<ProxyEntry> {
        let mut state = self.state.lock().await;

        if state.current.is_none() || state.uses >= self.rotate_every {
            state.current = self.pool.get().await;
            state.uses = 0;
        }
        if state.current.is_some() {
            state.uses += 1;
        }

        state.current.clone()
    }

    /// Report the held proxy as dead and drop the affinity to it.
    pub async fn mark_failed(&self) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.current.take() {
            state.uses = 0;
            self.pool.mark_failed(&entry).await;
        }
    }
}
