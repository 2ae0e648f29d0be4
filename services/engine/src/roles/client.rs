//! Per-account role clients
//!
//! `ClientFactory` turns an account into an `AccountClient` by walking that
//! account's role-assumption chain from the hub session. The client exposes
//! the convergence operations bound to its session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::backend::{IamBackend, Role, Session, SessionProvider};
use super::ensure;
use crate::accounts::{Account, AccountType, SpecialAccount};
use crate::config::EngineConfig;
use crate::error::{OrgError, Result};
use crate::naming::roles;
use crate::policies::Document;
use crate::tagging::TagMap;

/// What can be done inside one reached account.
#[async_trait]
pub trait RoleCapabilities: Send + Sync {
    fn session(&self) -> &Session;

    async fn ensure_role(&self, name: &str, trust: &Document, extra_tags: &TagMap) -> Result<Role>;

    async fn ensure_role_with_policy(
        &self,
        name: &str,
        trust: &Document,
        policy: &Document,
        extra_tags: &TagMap,
    ) -> Result<Role>;

    async fn attach_policy(&self, name: &str, policy_arn: &str) -> Result<()>;

    async fn detach_policy(&self, name: &str, policy_arn: &str) -> Result<()>;

    /// ARN of the account's GitHub Actions OIDC provider, creating it if needed.
    async fn ensure_github_actions_provider(&self) -> Result<String>;
}

/// A session inside one account plus the backend to act through.
#[derive(Clone)]
pub struct AccountClient {
    iam: Arc<dyn IamBackend>,
    session: Session,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for AccountClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountClient")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccountClient {
    pub fn account_id(&self) -> &str {
        &self.session.account_id
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.iam.list_roles(&self.session).await?)
    }

    pub async fn list_attached_role_policies(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.iam.list_attached_role_policies(&self.session, name).await?)
    }
}

#[async_trait]
impl RoleCapabilities for AccountClient {
    fn session(&self) -> &Session {
        &self.session
    }

    async fn ensure_role(&self, name: &str, trust: &Document, extra_tags: &TagMap) -> Result<Role> {
        ensure::ensure_role(
            self.iam.as_ref(),
            &self.session,
            &self.config,
            name,
            trust,
            extra_tags,
        )
        .await
    }

    async fn ensure_role_with_policy(
        &self,
        name: &str,
        trust: &Document,
        policy: &Document,
        extra_tags: &TagMap,
    ) -> Result<Role> {
        ensure::ensure_role_with_policy(
            self.iam.as_ref(),
            &self.session,
            &self.config,
            name,
            trust,
            policy,
            extra_tags,
        )
        .await
    }

    async fn attach_policy(&self, name: &str, policy_arn: &str) -> Result<()> {
        ensure::attach_policy(self.iam.as_ref(), &self.session, name, policy_arn).await
    }

    async fn detach_policy(&self, name: &str, policy_arn: &str) -> Result<()> {
        ensure::detach_policy(self.iam.as_ref(), &self.session, name, policy_arn).await
    }

    async fn ensure_github_actions_provider(&self) -> Result<String> {
        ensure::ensure_github_actions_provider(self.iam.as_ref(), &self.session, &self.config).await
    }
}

/// Builds `AccountClient`s from a hub session in the management account.
#[derive(Clone)]
pub struct ClientFactory {
    sessions: Arc<dyn SessionProvider>,
    iam: Arc<dyn IamBackend>,
    hub: Session,
    config: Arc<EngineConfig>,
}

impl ClientFactory {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        iam: Arc<dyn IamBackend>,
        hub: Session,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions,
            iam,
            hub,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hub(&self) -> &Session {
        &self.hub
    }

    /// A client acting directly with the hub session.
    pub fn hub_client(&self) -> AccountClient {
        self.client(self.hub.clone())
    }

    fn client(&self, session: Session) -> AccountClient {
        AccountClient {
            iam: Arc::clone(&self.iam),
            session,
            config: Arc::clone(&self.config),
        }
    }

    /// Roles to try, in order, when reaching `account`.
    pub fn assumption_chain(account: &Account) -> Vec<&'static str> {
        match account.account_type() {
            AccountType::Special(SpecialAccount::Audit) => {
                vec![roles::ORGANIZATION_ACCOUNT_ACCESS_ROLE]
            }
            _ => vec![
                account.administrator_role_name(),
                roles::ORGANIZATION_ACCOUNT_ACCESS_ROLE,
            ],
        }
    }

    /// Assume the first role in `chain` that works; `UnreachableAccount` if none does.
    pub async fn assume_into(&self, account_id: &str, chain: &[&str]) -> Result<AccountClient> {
        let mut failures = Vec::with_capacity(chain.len());
        for role_name in chain {
            match self
                .sessions
                .assume_role(&self.hub, account_id, role_name, self.config.session_duration())
                .await
            {
                Ok(session) => {
                    debug!(account_id, role = %role_name, "Assumed role");
                    return Ok(self.client(session));
                }
                Err(e) => {
                    warn!(account_id, role = %role_name, error = %e, "Could not assume role");
                    failures.push(format!("{}: {}", role_name, e));
                }
            }
        }
        Err(OrgError::unreachable(account_id, failures.join("; ")))
    }

    /// Reach `account`, using the hub session directly for the hub's own account.
    pub async fn for_account(&self, account: &Account) -> Result<AccountClient> {
        if account.id == self.hub.account_id {
            return Ok(self.hub_client());
        }
        self.assume_into(&account.id, &Self::assumption_chain(account)).await
    }
}
