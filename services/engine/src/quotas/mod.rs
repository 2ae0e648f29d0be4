//! Service Quotas
//!
//! Raising a service quota is another idempotent convergence, except that
//! the provider grants it asynchronously: check, reuse or submit a request,
//! then poll until the quota is high enough or the caller's deadline passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{BackendError, OrgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaRequestStatus {
    Pending,
    CaseOpened,
    Approved,
    Denied,
    CaseClosed,
}

impl QuotaRequestStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, QuotaRequestStatus::Pending | QuotaRequestStatus::CaseOpened)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceQuota {
    pub quota_code: String,
    pub service_code: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedQuotaChange {
    pub id: String,
    pub quota_code: String,
    pub service_code: String,
    pub desired_value: f64,
    pub status: QuotaRequestStatus,
}

/// Per-region service quota API.
#[async_trait]
pub trait ServiceQuotaBackend: Send + Sync {
    /// Fails with `NoSuchResource` when the account has no applied value.
    async fn get_service_quota(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
    ) -> Result<ServiceQuota, BackendError>;

    async fn get_default_service_quota(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
    ) -> Result<ServiceQuota, BackendError>;

    /// Every increase ever requested for this quota, all pages.
    async fn list_requested_changes(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
    ) -> Result<Vec<RequestedQuotaChange>, BackendError>;

    async fn request_increase(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
        desired_value: f64,
    ) -> Result<RequestedQuotaChange, BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRequest {
    pub quota_code: String,
    pub service_code: String,
    pub desired_value: f64,
    /// No deadline means wait for as long as it takes
    pub deadline: Option<DateTime<Utc>>,
}

impl QuotaRequest {
    pub fn new(
        quota_code: impl Into<String>,
        service_code: impl Into<String>,
        desired_value: f64,
    ) -> Self {
        Self {
            quota_code: quota_code.into(),
            service_code: service_code.into(),
            desired_value,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn deadline_passed(&self, region: &str) -> OrgError {
        OrgError::DeadlinePassed {
            quota_code: self.quota_code.clone(),
            service_code: self.service_code.clone(),
            region: region.to_string(),
        }
    }
}

/// The applied quota, else the provider default, else `None` when neither is visible.
async fn current_quota(
    backend: &dyn ServiceQuotaBackend,
    region: &str,
    request: &QuotaRequest,
) -> Result<Option<ServiceQuota>> {
    let (q, s) = (&request.quota_code, &request.service_code);
    match backend.get_service_quota(region, q, s).await {
        Ok(quota) => return Ok(Some(quota)),
        Err(BackendError::NoSuchResource(_)) => {}
        Err(e) => return Err(e.into()),
    }
    match backend.get_default_service_quota(region, q, s).await {
        Ok(quota) => Ok(Some(quota)),
        Err(BackendError::NoSuchResource(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Raise one quota in one region to at least `request.desired_value`.
///
/// Returns `OrgError::DeadlinePassed` if the deadline elapses first; callers
/// may treat that as a warning (see `OrgError::is_soft`).
pub async fn ensure_service_quota(
    backend: &dyn ServiceQuotaBackend,
    region: &str,
    request: &QuotaRequest,
    poll_interval: Duration,
) -> Result<()> {
    let (q, s) = (request.quota_code.as_str(), request.service_code.as_str());
    let Some(quota) = current_quota(backend, region, request).await? else {
        debug!(region, quota_code = q, service_code = s, "Quota not visible; nothing to raise");
        return Ok(());
    };
    if quota.value >= request.desired_value {
        info!(region, quota_code = q, value = quota.value, "Service quota already sufficient");
        return Ok(());
    }

    let pending = backend
        .list_requested_changes(region, q, s)
        .await?
        .into_iter()
        .find(|change| change.desired_value >= request.desired_value && change.status.is_pending());
    match pending {
        Some(change) => info!(
            region,
            quota_code = q,
            desired_value = change.desired_value,
            request_id = %change.id,
            "Waiting on an earlier service quota increase request"
        ),
        None => {
            let change = backend
                .request_increase(region, q, s, request.desired_value)
                .await?;
            info!(
                region,
                quota_code = q,
                desired_value = change.desired_value,
                request_id = %change.id,
                "Requested a service quota increase"
            );
        }
    }

    loop {
        if request.deadline.is_some_and(|deadline| Utc::now() > deadline) {
            return Err(request.deadline_passed(region));
        }
        // Until the increase is applied only the default may be visible.
        if let Some(quota) = current_quota(backend, region, request).await? {
            if quota.value >= request.desired_value {
                info!(
                    region,
                    quota_code = q,
                    value = quota.value,
                    "Service quota increase granted"
                );
                return Ok(());
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// `ensure_service_quota` in every configured region at once.
///
/// Every region's result is drained; the first error received is returned.
pub async fn ensure_service_quota_in_all_regions(
    backend: Arc<dyn ServiceQuotaBackend>,
    config: &EngineConfig,
    request: &QuotaRequest,
) -> Result<()> {
    let regions = config.regions.clone();
    let (tx, mut rx) = mpsc::channel(regions.len().max(1));
    for region in &regions {
        let backend = Arc::clone(&backend);
        let request = request.clone();
        let region = region.clone();
        let poll_interval = config.quota_poll_interval();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result =
                ensure_service_quota(backend.as_ref(), &region, &request, poll_interval).await;
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    let mut first_error = None;
    while let Some(result) = rx.recv().await {
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    info!(
        quota_code = %request.quota_code,
        desired_value = request.desired_value,
        "Service quota sufficient in all regions"
    );
    Ok(())
}
