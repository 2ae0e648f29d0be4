//! Account Catalog
//!
//! The organization's account listing is owned elsewhere; the engine only
//! consumes it through `AccountCatalog`.

use async_trait::async_trait;
use tracing::debug;

use super::types::{Account, AccountType, Organization, SpecialAccount};
use crate::error::{BackendError, OrgError, Result};

#[async_trait]
pub trait AccountCatalog: Send + Sync {
    /// Every account in the organization, with tags
    async fn list_accounts(&self) -> Result<Vec<Account>, BackendError>;

    async fn describe_organization(&self) -> Result<Organization, BackendError>;

    /// The single account of a special type, if there is one
    async fn find_account_by_type(
        &self,
        special: SpecialAccount,
    ) -> Result<Option<Account>, BackendError>;
}

/// Find a special account or fail with `NotFound`.
pub async fn require_special_account(
    catalog: &dyn AccountCatalog,
    special: SpecialAccount,
) -> Result<Account> {
    catalog
        .find_account_by_type(special)
        .await
        .map_err(|e| OrgError::aggregation(&format!("finding the {} account", special), e))?
        .ok_or_else(|| OrgError::NotFound(format!("the {} account does not exist", special)))
}

/// The organization's accounts sorted into the groups selection works with.
#[derive(Debug, Clone, Default)]
pub struct GroupedAccounts {
    pub admin: Vec<Account>,
    pub service: Vec<Account>,
    pub substrate: Option<Account>,
    pub audit: Option<Account>,
    pub deploy: Option<Account>,
    pub management: Option<Account>,
    pub network: Option<Account>,
}

impl GroupedAccounts {
    pub fn from_accounts(accounts: Vec<Account>, organization: &Organization) -> Self {
        let mut grouped = GroupedAccounts::default();
        for account in accounts {
            match account.account_type() {
                AccountType::Special(SpecialAccount::Management) => {
                    grouped.management = Some(account)
                }
                AccountType::Special(SpecialAccount::Audit) => grouped.audit = Some(account),
                AccountType::Special(SpecialAccount::Deploy) => grouped.deploy = Some(account),
                AccountType::Special(SpecialAccount::Network) => grouped.network = Some(account),
                AccountType::Special(SpecialAccount::Substrate) => {
                    grouped.substrate = Some(account)
                }
                AccountType::Admin => grouped.admin.push(account),
                AccountType::Service if account.id == organization.management_account_id => {
                    grouped.management = Some(account)
                }
                AccountType::Service => grouped.service.push(account),
            }
        }
        grouped
    }

    /// List and group every account. Any catalog failure is an `Aggregation` error.
    pub async fn load(catalog: &dyn AccountCatalog) -> Result<Self> {
        let accounts = catalog
            .list_accounts()
            .await
            .map_err(|e| OrgError::aggregation("listing accounts", e))?;
        let organization = catalog
            .describe_organization()
            .await
            .map_err(|e| OrgError::aggregation("describing the organization", e))?;
        let grouped = Self::from_accounts(accounts, &organization);
        debug!(
            admin = grouped.admin.len(),
            service = grouped.service.len(),
            "Grouped organization accounts"
        );
        Ok(grouped)
    }
}
