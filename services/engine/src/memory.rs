//! In-memory organization
//!
//! A complete, serializable organization that implements every external
//! collaborator trait: the account catalog, role assumption, IAM and service
//! quotas. The `orgtrust` binary runs against a JSON snapshot of it, and the
//! test suites use it with call counters and failure injection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::accounts::{Account, AccountCatalog, Organization, SpecialAccount};
use crate::error::{BackendError, Result};
use crate::naming::{oidc_provider_arn, role_arn, roles};
use crate::quotas::{QuotaRequestStatus, RequestedQuotaChange, ServiceQuota, ServiceQuotaBackend};
use crate::roles::{Credentials, IamBackend, Role, Session, SessionProvider};
use crate::tagging::TagMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRole {
    pub role: Role,
    #[serde(default)]
    pub inline_policies: BTreeMap<String, String>,
    #[serde(default)]
    pub attached_policies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIam {
    #[serde(default)]
    pub roles: BTreeMap<String, StoredRole>,
    #[serde(default)]
    pub oidc_providers: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub region: String,
    pub quota_code: String,
    pub service_code: String,
    /// Applied value; `None` means only the provider default is visible
    pub value: Option<f64>,
    pub default_value: Option<f64>,
    #[serde(default)]
    pub changes: Vec<RequestedQuotaChange>,
}

impl QuotaState {
    fn is(&self, region: &str, quota_code: &str, service_code: &str) -> bool {
        self.region == region && self.quota_code == quota_code && self.service_code == service_code
    }
}

/// Everything the in-memory organization holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSnapshot {
    pub organization: Organization,
    pub accounts: Vec<Account>,
    /// IAM state per account id
    #[serde(default)]
    pub iam: BTreeMap<String, AccountIam>,
    /// Accounts where every role assumption fails
    #[serde(default)]
    pub unreachable: BTreeSet<String>,
    #[serde(default)]
    pub quotas: Vec<QuotaState>,
    /// Grant quota increases as soon as they are requested
    #[serde(default)]
    pub auto_approve_quotas: bool,
}

#[derive(Debug, Default)]
struct Counters {
    assume_role: AtomicUsize,
    create_role: AtomicUsize,
    quota_requests: AtomicUsize,
}

pub struct InMemoryOrganization {
    state: Mutex<OrganizationSnapshot>,
    counters: Counters,
    failing_listings: bool,
}

fn not_found(kind: &str, name: &str, account_id: &str) -> BackendError {
    BackendError::NoSuchEntity(format!("{} {} in account {}", kind, name, account_id))
}

fn oidc_host(url: &str) -> &str {
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    url.split('/').next().unwrap_or(url)
}

impl InMemoryOrganization {
    pub fn new(organization: Organization) -> Self {
        Self::from_snapshot(OrganizationSnapshot {
            organization,
            accounts: Vec::new(),
            iam: BTreeMap::new(),
            unreachable: BTreeSet::new(),
            quotas: Vec::new(),
            auto_approve_quotas: false,
        })
    }

    pub fn from_snapshot(snapshot: OrganizationSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            counters: Counters::default(),
            failing_listings: false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_snapshot(serde_json::from_str(&raw)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn snapshot(&self) -> OrganizationSnapshot {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, OrganizationSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_account(self, account: Account) -> Self {
        self.state().accounts.push(account);
        self
    }

    /// An account that is listed but cannot be reached through any role.
    pub fn with_unreachable_account(self, account: Account) -> Self {
        {
            let mut state = self.state();
            state.unreachable.insert(account.id.clone());
            state.accounts.push(account);
        }
        self
    }

    /// Provision an unmanaged role that can be assumed from the hub.
    pub fn with_assumable_role(self, account_id: &str, role_name: &str) -> Self {
        self.state()
            .iam
            .entry(account_id.to_string())
            .or_default()
            .roles
            .insert(
                role_name.to_string(),
                StoredRole {
                    role: Role {
                        name: role_name.to_string(),
                        arn: role_arn(account_id, role_name),
                        assume_role_policy_document: r#"{"Version":"2012-10-17","Statement":[]}"#
                            .to_string(),
                        tags: TagMap::new(),
                    },
                    ..Default::default()
                },
            );
        self
    }

    /// Make every catalog call fail.
    pub fn failing_listings(mut self) -> Self {
        self.failing_listings = true;
        self
    }

    pub fn with_quota(
        self,
        region: &str,
        quota_code: &str,
        service_code: &str,
        value: Option<f64>,
        default_value: Option<f64>,
    ) -> Self {
        self.state().quotas.push(QuotaState {
            region: region.to_string(),
            quota_code: quota_code.to_string(),
            service_code: service_code.to_string(),
            value,
            default_value,
            changes: Vec::new(),
        });
        self
    }

    pub fn with_requested_change(
        self,
        region: &str,
        quota_code: &str,
        service_code: &str,
        desired_value: f64,
        status: QuotaRequestStatus,
    ) -> Self {
        {
            let mut state = self.state();
            if let Some(quota) = state
                .quotas
                .iter_mut()
                .find(|q| q.is(region, quota_code, service_code))
            {
                quota.changes.push(RequestedQuotaChange {
                    id: Uuid::new_v4().to_string(),
                    quota_code: quota_code.to_string(),
                    service_code: service_code.to_string(),
                    desired_value,
                    status,
                });
            }
        }
        self
    }

    pub fn auto_approving_quotas(self) -> Self {
        self.state().auto_approve_quotas = true;
        self
    }

    pub fn assume_role_calls(&self) -> usize {
        self.counters.assume_role.load(Ordering::Relaxed)
    }

    pub fn create_role_calls(&self) -> usize {
        self.counters.create_role.load(Ordering::Relaxed)
    }

    pub fn quota_increase_requests(&self) -> usize {
        self.counters.quota_requests.load(Ordering::Relaxed)
    }

    pub fn role(&self, account_id: &str, role_name: &str) -> Option<StoredRole> {
        self.state().iam.get(account_id)?.roles.get(role_name).cloned()
    }

    pub fn role_names(&self, account_id: &str) -> Vec<String> {
        self.state()
            .iam
            .get(account_id)
            .map(|iam| iam.roles.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn inline_policy(
        &self,
        account_id: &str,
        role_name: &str,
        policy_name: &str,
    ) -> Option<String> {
        self.role(account_id, role_name)?.inline_policies.get(policy_name).cloned()
    }

    fn with_role<T>(
        &self,
        session: &Session,
        name: &str,
        f: impl FnOnce(&mut StoredRole) -> T,
    ) -> Result<T, BackendError> {
        let mut state = self.state();
        state
            .iam
            .get_mut(&session.account_id)
            .and_then(|iam| iam.roles.get_mut(name))
            .map(f)
            .ok_or_else(|| not_found("role", name, &session.account_id))
    }

    fn with_quota_state<T>(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
        f: impl FnOnce(&mut QuotaState, bool) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut state = self.state();
        let auto_approve = state.auto_approve_quotas;
        let quota = state
            .quotas
            .iter_mut()
            .find(|q| q.is(region, quota_code, service_code))
            .ok_or_else(|| {
                BackendError::NoSuchResource(format!(
                    "quota {} {} in {}",
                    quota_code, service_code, region
                ))
            })?;
        f(quota, auto_approve)
    }
}

#[async_trait]
impl AccountCatalog for InMemoryOrganization {
    async fn list_accounts(&self) -> Result<Vec<Account>, BackendError> {
        if self.failing_listings {
            return Err(BackendError::AccessDenied("organizations:ListAccounts".into()));
        }
        Ok(self.state().accounts.clone())
    }

    async fn describe_organization(&self) -> Result<Organization, BackendError> {
        if self.failing_listings {
            return Err(BackendError::AccessDenied("organizations:DescribeOrganization".into()));
        }
        Ok(self.state().organization.clone())
    }

    async fn find_account_by_type(
        &self,
        special: SpecialAccount,
    ) -> Result<Option<Account>, BackendError> {
        if self.failing_listings {
            return Err(BackendError::AccessDenied("organizations:ListAccounts".into()));
        }
        let state = self.state();
        let management_id = &state.organization.management_account_id;
        Ok(state
            .accounts
            .iter()
            .find(|account| {
                account.special_account() == Some(special)
                    || (special == SpecialAccount::Management && &account.id == management_id)
            })
            .cloned())
    }
}

#[async_trait]
impl SessionProvider for InMemoryOrganization {
    async fn assume_role(
        &self,
        from: &Session,
        account_id: &str,
        role_name: &str,
        duration: Duration,
    ) -> Result<Session, BackendError> {
        self.counters.assume_role.fetch_add(1, Ordering::Relaxed);
        let state = self.state();
        let denied = || {
            BackendError::AccessDenied(format!(
                "{} may not assume {} in account {}",
                from.principal_name, role_name, account_id
            ))
        };
        if state.unreachable.contains(account_id) {
            return Err(denied());
        }
        let member = state.accounts.iter().any(|a| a.id == account_id);
        let provisioned = state
            .iam
            .get(account_id)
            .is_some_and(|iam| iam.roles.contains_key(role_name));
        if !provisioned && !(member && role_name == roles::ORGANIZATION_ACCOUNT_ACCESS_ROLE) {
            return Err(denied());
        }

        let lifetime = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::hours(1));
        let expires_at = Utc::now() + lifetime;
        Ok(Session {
            account_id: account_id.to_string(),
            principal_name: role_name.to_string(),
            credentials: Some(Credentials {
                access_key_id: format!("ASIA{}", Uuid::new_v4().simple()),
                secret_access_key: Uuid::new_v4().to_string(),
                session_token: Uuid::new_v4().to_string(),
                expires_at,
            }),
        })
    }
}

#[async_trait]
impl IamBackend for InMemoryOrganization {
    async fn create_role(
        &self,
        session: &Session,
        name: &str,
        assume_role_policy: &str,
        tags: &TagMap,
    ) -> Result<Role, BackendError> {
        self.counters.create_role.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        let iam = state.iam.entry(session.account_id.clone()).or_default();
        if iam.roles.contains_key(name) {
            return Err(BackendError::AlreadyExists(format!(
                "role {} in account {}",
                name, session.account_id
            )));
        }
        let role = Role {
            name: name.to_string(),
            arn: role_arn(&session.account_id, name),
            assume_role_policy_document: assume_role_policy.to_string(),
            tags: tags.clone(),
        };
        iam.roles.insert(
            name.to_string(),
            StoredRole {
                role: role.clone(),
                ..Default::default()
            },
        );
        debug!(account_id = %session.account_id, role = %name, "Stored new role");
        Ok(role)
    }

    async fn get_role(&self, session: &Session, name: &str) -> Result<Role, BackendError> {
        self.with_role(session, name, |stored| stored.role.clone())
    }

    async fn tag_role(
        &self,
        session: &Session,
        name: &str,
        tags: &TagMap,
    ) -> Result<(), BackendError> {
        self.with_role(session, name, |stored| {
            stored.role.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())))
        })
    }

    async fn update_assume_role_policy(
        &self,
        session: &Session,
        name: &str,
        assume_role_policy: &str,
    ) -> Result<(), BackendError> {
        self.with_role(session, name, |stored| {
            stored.role.assume_role_policy_document = assume_role_policy.to_string()
        })
    }

    async fn put_role_policy(
        &self,
        session: &Session,
        name: &str,
        policy_name: &str,
        policy: &str,
    ) -> Result<(), BackendError> {
        self.with_role(session, name, |stored| {
            stored
                .inline_policies
                .insert(policy_name.to_string(), policy.to_string());
        })
    }

    async fn attach_role_policy(
        &self,
        session: &Session,
        name: &str,
        policy_arn: &str,
    ) -> Result<(), BackendError> {
        self.with_role(session, name, |stored| {
            if !stored.attached_policies.iter().any(|arn| arn == policy_arn) {
                stored.attached_policies.push(policy_arn.to_string());
            }
        })
    }

    async fn detach_role_policy(
        &self,
        session: &Session,
        name: &str,
        policy_arn: &str,
    ) -> Result<(), BackendError> {
        let detached = self.with_role(session, name, |stored| {
            let before = stored.attached_policies.len();
            stored.attached_policies.retain(|arn| arn != policy_arn);
            stored.attached_policies.len() != before
        })?;
        if detached {
            Ok(())
        } else {
            Err(not_found("attached policy", policy_arn, &session.account_id))
        }
    }

    async fn list_roles(&self, session: &Session) -> Result<Vec<Role>, BackendError> {
        Ok(self
            .state()
            .iam
            .get(&session.account_id)
            .map(|iam| iam.roles.values().map(|stored| stored.role.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_attached_role_policies(
        &self,
        session: &Session,
        name: &str,
    ) -> Result<Vec<String>, BackendError> {
        self.with_role(session, name, |stored| stored.attached_policies.clone())
    }

    async fn create_open_id_connect_provider(
        &self,
        session: &Session,
        url: &str,
        _client_ids: &[String],
        _thumbprints: &[String],
    ) -> Result<String, BackendError> {
        let arn = oidc_provider_arn(&session.account_id, oidc_host(url));
        let mut state = self.state();
        let iam = state.iam.entry(session.account_id.clone()).or_default();
        if !iam.oidc_providers.insert(arn.clone()) {
            return Err(BackendError::AlreadyExists(arn));
        }
        Ok(arn)
    }
}

#[async_trait]
impl ServiceQuotaBackend for InMemoryOrganization {
    async fn get_service_quota(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
    ) -> Result<ServiceQuota, BackendError> {
        self.with_quota_state(region, quota_code, service_code, |quota, _| match quota.value {
            Some(value) => Ok(ServiceQuota {
                quota_code: quota_code.to_string(),
                service_code: service_code.to_string(),
                value,
            }),
            None => Err(BackendError::NoSuchResource(format!(
                "no applied value for {} {} in {}",
                quota_code, service_code, region
            ))),
        })
    }

    async fn get_default_service_quota(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
    ) -> Result<ServiceQuota, BackendError> {
        self.with_quota_state(region, quota_code, service_code, |quota, _| {
            match quota.default_value {
                Some(value) => Ok(ServiceQuota {
                    quota_code: quota_code.to_string(),
                    service_code: service_code.to_string(),
                    value,
                }),
                None => Err(BackendError::NoSuchResource(format!(
                    "no default for {} {} in {}",
                    quota_code, service_code, region
                ))),
            }
        })
    }

    async fn list_requested_changes(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
    ) -> Result<Vec<RequestedQuotaChange>, BackendError> {
        self.with_quota_state(region, quota_code, service_code, |quota, _| {
            Ok(quota.changes.clone())
        })
    }

    async fn request_increase(
        &self,
        region: &str,
        quota_code: &str,
        service_code: &str,
        desired_value: f64,
    ) -> Result<RequestedQuotaChange, BackendError> {
        self.counters.quota_requests.fetch_add(1, Ordering::Relaxed);
        self.with_quota_state(region, quota_code, service_code, |quota, auto_approve| {
            let change = RequestedQuotaChange {
                id: Uuid::new_v4().to_string(),
                quota_code: quota_code.to_string(),
                service_code: service_code.to_string(),
                desired_value,
                status: if auto_approve {
                    QuotaRequestStatus::Approved
                } else {
                    QuotaRequestStatus::Pending
                },
            };
            if auto_approve {
                quota.value = Some(desired_value);
            }
            quota.changes.push(change.clone());
            Ok(change)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> InMemoryOrganization {
        InMemoryOrganization::new(Organization {
            id: "o-example".to_string(),
            management_account_id: "000000000000".to_string(),
        })
        .with_account(Account::new("000000000000", "management"))
        .with_account(Account::special("222222222222", SpecialAccount::Deploy))
    }

    #[tokio::test]
    async fn test_find_account_by_type() {
        let org = org();
        let deploy = org.find_account_by_type(SpecialAccount::Deploy).await.unwrap();
        assert_eq!(deploy.map(|a| a.id), Some("222222222222".to_string()));
        let management = org.find_account_by_type(SpecialAccount::Management).await.unwrap();
        assert_eq!(management.map(|a| a.id), Some("000000000000".to_string()));
        assert!(org.find_account_by_type(SpecialAccount::Network).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_role_twice_conflicts() {
        let org = org();
        let session = Session::hub("000000000000", "OrganizationAdministrator");
        org.create_role(&session, "Deployer", "{}", &TagMap::new()).await.unwrap();
        let err = org
            .create_role(&session, "Deployer", "{}", &TagMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
        assert_eq!(org.create_role_calls(), 2);
    }

    #[tokio::test]
    async fn test_non_member_cannot_be_assumed_into() {
        let org = org();
        let hub = Session::hub("000000000000", "OrganizationAdministrator");
        let err = org
            .assume_role(
                &hub,
                "999999999999",
                roles::ORGANIZATION_ACCOUNT_ACCESS_ROLE,
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_snapshot_round_trips_through_file() {
        let org = org();
        let session = Session::hub("000000000000", "OrganizationAdministrator");
        org.create_role(&session, "Deployer", "{}", &TagMap::new()).await.unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        org.save(file.path()).unwrap();
        let loaded = InMemoryOrganization::load(file.path()).unwrap();
        assert_eq!(loaded.snapshot(), org.snapshot());
    }
}
