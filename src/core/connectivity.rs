//! Connectivity gate.
//!
//! Observes online/offline transitions and triggers reconciliation exactly
//! once per offline→online edge, and only when unsynced data is pending.
//! Overlap with an in-flight run is absorbed by the reconciler's
//! non-reentrant flag, not here.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::LocalStore;

use super::reconciler::SyncService;

/// Online/offline state with an edge-triggered sync hook.
pub struct ConnectivityGate {
    tx: watch::Sender<bool>,
}

impl ConnectivityGate {
    /// Create a gate with the given initial state
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Current state
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report a network transition. Idempotent per state.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
    }

    /// Spawn the trigger task: on every offline→online edge with unsynced
    /// data pending, kick off one reconciliation. Runs until the gate is
    /// dropped.
    pub fn spawn_trigger(
        &self,
        store: Arc<LocalStore>,
        sync: Arc<SyncService>,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        let mut was_online = *rx.borrow();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let edge = online && !was_online;
                was_online = online;
                if !edge {
                    continue;
                }

                match store.pending_sync_count() {
                    Ok(0) => {
                        debug!("back online, nothing pending");
                    }
                    Ok(pending) => {
                        info!(pending, "back online, reconciling");
                        if let Err(e) = sync.reconcile().await {
                            warn!(error = %e, "auto-sync failed");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "could not read pending count");
                    }
                }
            }
        })
    }
}
