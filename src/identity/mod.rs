/// Instance identity status
///
/// The watchdog and operator lock commit status changes here. Resolution
/// reads the latest committed status from a watch channel, so the hot path
/// never waits on storage or on a running check.

pub mod watchdog;

pub use watchdog::{evaluate, IdentityWatchdog, Verdict};

use crate::{
    db::models::{InstanceIdentity, InstanceStatus},
    error::{MonaliasError, MonaliasResult},
    metrics,
    store::InstanceStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub const REASON_WELL_KNOWN_UNREACHABLE: &str = "well_known_unreachable";
pub const REASON_IDENTITY_MISMATCH: &str = "identity_mismatch";

/// Last committed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: InstanceStatus,
    pub reason: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl From<&InstanceIdentity> for StatusSnapshot {
    fn from(identity: &InstanceIdentity) -> Self {
        Self {
            status: identity.status,
            reason: identity.status_reason.clone(),
            checked_at: identity.last_identity_check_at,
        }
    }
}

/// Owner of the instance status: storage plus a published snapshot
pub struct IdentityState {
    store: Arc<dyn InstanceStore>,
    tx: watch::Sender<Arc<StatusSnapshot>>,
    /// Held across each store write and its publish so the snapshot
    /// always matches the last committed row
    write_lock: Mutex<()>,
}

impl IdentityState {
    /// Seed the snapshot from the stored identity
    pub async fn load(store: Arc<dyn InstanceStore>) -> MonaliasResult<Self> {
        let identity = store.read_instance().await?;
        Ok(Self::new(store, StatusSnapshot::from(&identity)))
    }

    pub fn new(store: Arc<dyn InstanceStore>, initial: StatusSnapshot) -> Self {
        metrics::INSTANCE_STATUS.set(initial.status.as_gauge());
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            store,
            tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Most recently committed status
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Refuse when locked, carrying the stored reason
    pub fn ensure_unlocked(&self) -> MonaliasResult<()> {
        let snapshot = self.snapshot();
        match snapshot.status {
            InstanceStatus::Locked => Err(MonaliasError::InstanceLocked {
                reason: snapshot.reason.clone(),
            }),
            InstanceStatus::Ok | InstanceStatus::Degraded => Ok(()),
        }
    }

    /// Read the full stored identity
    pub async fn read(&self) -> MonaliasResult<InstanceIdentity> {
        self.store.read_instance().await
    }

    /// Persist a check verdict with the current time, then publish it
    pub async fn commit(
        &self,
        status: InstanceStatus,
        reason: Option<&str>,
    ) -> MonaliasResult<StatusSnapshot> {
        let _guard = self.write_lock.lock().await;
        let checked_at = Utc::now();
        self.store.write_status(status, reason, checked_at).await?;

        let snapshot = StatusSnapshot {
            status,
            reason: reason.map(str::to_string),
            checked_at: Some(checked_at),
        };
        self.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Operator lock
    pub async fn lock(&self, reason: &str) -> MonaliasResult<StatusSnapshot> {
        let _guard = self.write_lock.lock().await;
        self.store.lock_instance(reason).await?;

        let snapshot = StatusSnapshot {
            status: InstanceStatus::Locked,
            reason: Some(reason.to_string()),
            checked_at: self.snapshot().checked_at,
        };
        tracing::warn!(reason = %reason, "instance_locked_by_operator");
        self.publish(snapshot.clone());
        Ok(snapshot)
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        metrics::INSTANCE_STATUS.set(snapshot.status.as_gauge());
        self.tx.send_replace(Arc::new(snapshot));
    }
}
