/// Identity self-check
///
/// Each cycle fetches the instance's own well-known document and compares
/// it with the configured identity. The interval job and the admin
/// unlock/check endpoints all call `check_once`.
use super::{
    IdentityState, StatusSnapshot, REASON_IDENTITY_MISMATCH, REASON_WELL_KNOWN_UNREACHABLE,
};
use crate::{
    config::IdentityConfig,
    db::models::{InstanceIdentity, InstanceStatus},
    error::{MonaliasError, MonaliasResult},
    metrics,
    protocol::WellKnownDocument,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of comparing a fetched document with the stored identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub status: InstanceStatus,
    pub reason: Option<&'static str>,
}

/// Decide the status for one cycle.
///
/// `fetched` is `None` when the document could not be fetched or parsed.
pub fn evaluate(
    fetched: Option<&WellKnownDocument>,
    public_base_url: &str,
    identity: &InstanceIdentity,
) -> Verdict {
    let Some(document) = fetched else {
        return Verdict {
            status: InstanceStatus::Degraded,
            reason: Some(REASON_WELL_KNOWN_UNREACHABLE),
        };
    };

    if document.homeserver != public_base_url
        || !document.has_key(&identity.signing_key_id, &identity.signing_pubkey)
    {
        return Verdict {
            status: InstanceStatus::Locked,
            reason: Some(REASON_IDENTITY_MISMATCH),
        };
    }

    Verdict {
        status: InstanceStatus::Ok,
        reason: None,
    }
}

/// Periodic reconciliation of claimed vs published identity
pub struct IdentityWatchdog {
    state: Arc<IdentityState>,
    http_client: reqwest::Client,
    well_known_url: String,
    public_base_url: String,
}

impl IdentityWatchdog {
    pub fn new(
        state: Arc<IdentityState>,
        config: &IdentityConfig,
        public_base_url: impl Into<String>,
    ) -> MonaliasResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("monalias/", env!("CARGO_PKG_VERSION")))
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| MonaliasError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            state,
            http_client,
            well_known_url: config.well_known_url.clone(),
            public_base_url: public_base_url.into(),
        })
    }

    pub fn state(&self) -> &Arc<IdentityState> {
        &self.state
    }

    /// Fetch and parse the published document; any failure is reported and absorbed
    async fn fetch_well_known(&self) -> Option<WellKnownDocument> {
        let response = match self.http_client.get(&self.well_known_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %self.well_known_url, error = %e, "well_known_fetch_failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url = %self.well_known_url, status = %response.status(), "well_known_fetch_failed");
            return None;
        }

        match response.json::<WellKnownDocument>().await {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(url = %self.well_known_url, error = %e, "well_known_parse_failed");
                None
            }
        }
    }

    /// Run one cycle and commit its verdict.
    ///
    /// Only a storage failure is returned as an error; in that case no
    /// status is written.
    pub async fn check_once(&self) -> MonaliasResult<StatusSnapshot> {
        let identity = self.state.read().await?;
        let document = self.fetch_well_known().await;
        let verdict = evaluate(document.as_ref(), &self.public_base_url, &identity);

        let snapshot = self.state.commit(verdict.status, verdict.reason).await?;
        metrics::record_identity_check(verdict.status.as_str());

        match verdict.status {
            InstanceStatus::Ok => info!(status = %verdict.status, "identity_check_completed"),
            InstanceStatus::Degraded | InstanceStatus::Locked => warn!(
                status = %verdict.status,
                reason = verdict.reason.unwrap_or_default(),
                "identity_check_completed"
            ),
        }

        Ok(snapshot)
    }
}
