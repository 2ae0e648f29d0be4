//! Service quota convergence against the in-memory backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orgtrust_engine::quotas::{QuotaRequestStatus, ServiceQuotaBackend};
use orgtrust_engine::{
    ensure_service_quota, ensure_service_quota_in_all_regions, EngineConfig, OrgError, QuotaRequest,
};

const REGION: &str = "us-east-1";
const QUOTA: &str = "L-1216C47A";
const SERVICE: &str = "ec2";

fn poll() -> Duration {
    Duration::from_millis(1)
}

fn passed() -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(1)
}

#[tokio::test]
async fn test_sufficient_quota_submits_nothing() {
    let org =
        common::empty_organization().with_quota(REGION, QUOTA, SERVICE, Some(10.0), Some(5.0));
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 0);
}

#[tokio::test]
async fn test_pending_request_is_reused_until_the_deadline() {
    let org = common::empty_organization()
        .with_quota(REGION, QUOTA, SERVICE, Some(5.0), Some(5.0))
        .with_requested_change(REGION, QUOTA, SERVICE, 20.0, QuotaRequestStatus::CaseOpened);
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0).with_deadline(passed());

    let err = ensure_service_quota(&org, REGION, &request, poll()).await.unwrap_err();
    assert!(matches!(err, OrgError::DeadlinePassed { ref region, .. } if region == REGION));
    assert!(err.is_soft());
    assert_eq!(org.quota_increase_requests(), 0);
}

#[tokio::test]
async fn test_denied_request_is_not_waited_on() {
    let org = common::empty_organization()
        .with_quota(REGION, QUOTA, SERVICE, Some(5.0), Some(5.0))
        .with_requested_change(REGION, QUOTA, SERVICE, 20.0, QuotaRequestStatus::Denied)
        .auto_approving_quotas();
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 1);
}

#[tokio::test]
async fn test_increase_is_requested_once_and_awaited() {
    let org = common::empty_organization()
        .with_quota(REGION, QUOTA, SERVICE, Some(5.0), Some(5.0))
        .auto_approving_quotas();
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 1);
    let quota = org.get_service_quota(REGION, QUOTA, SERVICE).await.unwrap();
    assert_eq!(quota.value, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 1);
}

#[tokio::test]
async fn test_default_quota_is_used_when_none_is_applied() {
    let org = common::empty_organization().with_quota(REGION, QUOTA, SERVICE, None, Some(50.0));
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 0);
}

#[tokio::test]
async fn test_unapplied_quota_keeps_polling_until_the_deadline() {
    let org = common::empty_organization().with_quota(REGION, QUOTA, SERVICE, None, Some(5.0));
    let deadline = Utc::now() + chrono::Duration::milliseconds(50);
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0).with_deadline(deadline);

    let err = ensure_service_quota(&org, REGION, &request, Duration::from_millis(5))
        .await
        .unwrap_err();
    assert!(matches!(err, OrgError::DeadlinePassed { .. }));
    assert_eq!(org.quota_increase_requests(), 1);
}

#[tokio::test]
async fn test_unapplied_quota_is_granted_through_a_request() {
    let org = common::empty_organization()
        .with_quota(REGION, QUOTA, SERVICE, None, Some(5.0))
        .auto_approving_quotas();
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 1);
}

#[tokio::test]
async fn test_invisible_quota_is_left_alone() {
    let org = common::empty_organization();
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0);

    ensure_service_quota(&org, REGION, &request, poll()).await.unwrap();
    assert_eq!(org.quota_increase_requests(), 0);
}

#[tokio::test]
async fn test_all_regions_reports_the_failing_region() {
    let config = EngineConfig {
        regions: vec!["us-east-1".to_string(), "us-west-2".to_string()],
        quota_poll_interval_secs: 0,
        ..Default::default()
    };
    let org = Arc::new(
        common::empty_organization()
            .with_quota("us-east-1", QUOTA, SERVICE, Some(10.0), None)
            .with_quota("us-west-2", QUOTA, SERVICE, Some(1.0), None)
            .with_requested_change("us-west-2", QUOTA, SERVICE, 10.0, QuotaRequestStatus::Pending),
    );
    let request = QuotaRequest::new(QUOTA, SERVICE, 10.0).with_deadline(passed());

    let backend: Arc<dyn ServiceQuotaBackend> = org.clone();
    let err = ensure_service_quota_in_all_regions(backend, &config, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, OrgError::DeadlinePassed { ref region, .. } if region == "us-west-2"));
    assert_eq!(org.quota_increase_requests(), 0);
}

#[tokio::test]
async fn test_all_regions_succeeds_when_every_region_is_sufficient() {
    let config = EngineConfig {
        regions: vec!["us-east-1".to_string(), "us-west-2".to_string()],
        ..Default::default()
    };
    let org = Arc::new(
        common::empty_organization()
            .with_quota("us-east-1", QUOTA, SERVICE, Some(10.0), None)
            .with_quota("us-west-2", QUOTA, SERVICE, None, Some(20.0)),
    );
    let backend: Arc<dyn ServiceQuotaBackend> = org.clone();
    ensure_service_quota_in_all_regions(backend, &config, &QuotaRequest::new(QUOTA, SERVICE, 10.0))
        .await
        .unwrap();
}
