//! Connectivity probing.
//!
//! Reachability is polled on a fixed interval rather than pushed from the
//! host OS: reachability callbacks are unreliable across the targets this
//! engine runs on, and a timer behaves the same everywhere. The engine owns
//! the recurring task; this module provides the probe seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::remote::RemoteStore;

/// Answers "can the remote store be reached right now?".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Default probe: ping the remote store itself. If the store answers, we
/// are online for every purpose this engine cares about.
pub struct RemotePingProbe {
    remote: Arc<dyn RemoteStore>,
}

impl RemotePingProbe {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ConnectivityProbe for RemotePingProbe {
    async fn check(&self) -> bool {
        self.remote.ping().await
    }
}

/// Manually switched probe for tests and host integrations that already
/// know their connectivity state.
pub struct ManualProbe {
    online: AtomicBool,
}

impl ManualProbe {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self { online: AtomicBool::new(online) }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for ManualProbe {
    async fn check(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
