use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per container name, so two replacements of the same
/// container never interleave their engine calls.
#[derive(Default)]
pub struct NameLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl NameLocks {
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only referenced by the map are neither held nor awaited
            inner.retain(|_, lock| Arc::strong_count(lock) > 1);
            inner.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
