//! Per-plugin reload serialization.

use std::collections::HashSet;
use std::sync::Arc;

use graft_kernel::plugin::{PluginError, PluginResult, ReloadPolicy};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct GuardState {
    reloading: Mutex<HashSet<String>>,
    released: Notify,
}

/// Set of plugin names currently mid-reload.
///
/// A name enters the set when [`ReloadGuard::acquire`] returns a permit and
/// leaves it when the permit is dropped, whatever way the reload ends.
#[derive(Clone, Default)]
pub struct ReloadGuard {
    state: Arc<GuardState>,
    policy: ReloadPolicy,
}

impl ReloadGuard {
    pub fn new(policy: ReloadPolicy) -> Self {
        Self {
            state: Arc::new(GuardState::default()),
            policy,
        }
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    pub fn is_reloading(&self, name: &str) -> bool {
        self.state.reloading.lock().contains(name)
    }

    pub fn reloading(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.reloading.lock().iter().cloned().collect();
        names.sort();
        names
    }

    /// Enter the reload section for `name`.
    ///
    /// With [`ReloadPolicy::Reject`] a held name fails immediately; with
    /// [`ReloadPolicy::Queue`] the call waits until it is released.
    pub async fn acquire(&self, name: &str) -> PluginResult<ReloadPermit> {
        loop {
            let released = self.state.released.notified();
            tokio::pin!(released);
            // register interest before checking so a release in between is not missed
            released.as_mut().enable();

            if self.state.reloading.lock().insert(name.to_string()) {
                return Ok(ReloadPermit {
                    state: self.state.clone(),
                    name: name.to_string(),
                });
            }

            match self.policy {
                ReloadPolicy::Reject => {
                    return Err(PluginError::ReloadInProgress(name.to_string()));
                }
                ReloadPolicy::Queue => {
                    debug!("Reload of {} queued behind a running reload", name);
                    released.await;
                }
            }
        }
    }
}

/// Membership of one name in the reload set; released on drop.
pub struct ReloadPermit {
    state: Arc<GuardState>,
    name: String,
}

impl ReloadPermit {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ReloadPermit {
    fn drop(&mut self) {
        self.state.reloading.lock().remove(&self.name);
        self.state.released.notify_waiters();
    }
}
