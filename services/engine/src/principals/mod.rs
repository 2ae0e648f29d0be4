//! Principal Assembler
//!
//! Computes the canned principal sets: who may assume administrator-class
//! roles, who may assume auditor-class roles, and every account in the
//! organization. Trust policies are replacements rather than diffs, so these
//! sets only ever grow as the organization matures, and any failure to list
//! or describe the organization aborts the whole computation.

use std::io::ErrorKind;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::accounts::AccountCatalog;
use crate::config::EngineConfig;
use crate::error::{OrgError, Result};
use crate::naming::{role_arn, roles, user_arn, users, ADMIN_DOMAIN};
use crate::policies::{Document, Principal};

/// Sorted, deduplicated ARN lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CannedPrincipals {
    pub admin: Vec<String>,
    pub auditor: Vec<String>,
    /// Bare account numbers, for read-only discovery roles
    pub org_accounts: Vec<String>,
}

fn canonical(mut arns: Vec<String>) -> Vec<String> {
    arns.sort();
    arns.dedup();
    arns
}

impl CannedPrincipals {
    /// Compute the canned principals.
    ///
    /// `bootstrapping` is true until the federated `Intranet` role exists in
    /// the admin accounts. After that, each admin account's `Intranet` role
    /// and the legacy alias (while it is active on `as_of`) are trusted too.
    pub async fn compute(
        catalog: &dyn AccountCatalog,
        config: &EngineConfig,
        bootstrapping: bool,
        as_of: NaiveDate,
    ) -> Result<Self> {
        let accounts = catalog
            .list_accounts()
            .await
            .map_err(|e| OrgError::aggregation("listing accounts", e))?;
        let organization = catalog
            .describe_organization()
            .await
            .map_err(|e| OrgError::aggregation("describing the organization", e))?;

        let legacy_alias = if bootstrapping {
            None
        } else {
            config.active_legacy_alias(as_of)
        };

        let mut admin = Vec::new();
        let mut auditor = Vec::new();
        for account in accounts.iter().filter(|a| a.domain() == Some(ADMIN_DOMAIN)) {
            admin.push(role_arn(&account.id, roles::ADMINISTRATOR));
            auditor.push(role_arn(&account.id, roles::ADMINISTRATOR));
            auditor.push(role_arn(&account.id, roles::AUDITOR));
            if !bootstrapping {
                for role in std::iter::once(roles::INTRANET).chain(legacy_alias) {
                    admin.push(role_arn(&account.id, role));
                    auditor.push(role_arn(&account.id, role));
                }
            }
        }

        let management = &organization.management_account_id;
        for set in [&mut admin, &mut auditor] {
            set.push(role_arn(management, roles::ORGANIZATION_ADMINISTRATOR));
            set.push(user_arn(management, users::ORGANIZATION_ADMINISTRATOR));
        }

        let canned = Self {
            admin: canonical(admin),
            auditor: canonical(auditor),
            org_accounts: canonical(accounts.into_iter().map(|a| a.id).collect()),
        };
        debug!(
            bootstrapping,
            admin = canned.admin.len(),
            auditor = canned.auditor.len(),
            accounts = canned.org_accounts.len(),
            "Computed canned principals"
        );
        Ok(canned)
    }
}

/// The canned principals wrapped as trust policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CannedPolicies {
    pub admin: Document,
    pub auditor: Document,
    pub org_accounts: Document,
}

pub const EXTRA_ADMINISTRATOR_POLICY: &str = "Administrator.assume-role-policy.json";
pub const EXTRA_AUDITOR_POLICY: &str = "Auditor.assume-role-policy.json";

/// Read an optional trust-policy fragment; a missing file is not an error.
fn read_extra(dir: Option<&Path>, filename: &str) -> Result<Option<Document>> {
    let Some(dir) = dir else {
        return Ok(None);
    };
    let path = dir.join(filename);
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            info!(path = %path.display(), "Merging extra assume-role policy statements");
            Ok(Some(Document::from_json(&raw)?))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(
                path = %path.display(),
                "No extra assume-role policy; create it to customize who can assume these roles"
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl CannedPolicies {
    pub fn from_principals(canned: &CannedPrincipals, config: &EngineConfig) -> Result<Self> {
        let dir = config.extra_policy_dir.as_deref();

        let mut admin = Document::assume_role(Principal::aws(canned.admin.iter().cloned()));
        if let Some(extra) = read_extra(dir, EXTRA_ADMINISTRATOR_POLICY)? {
            admin = admin.merge(&extra);
        }
        let mut auditor = Document::assume_role(Principal::aws(canned.auditor.iter().cloned()));
        if let Some(extra) = read_extra(dir, EXTRA_AUDITOR_POLICY)? {
            auditor = auditor.merge(&extra);
        }

        Ok(Self {
            admin,
            auditor,
            org_accounts: Document::assume_role(Principal::aws(
                canned.org_accounts.iter().cloned(),
            )),
        })
    }

    pub async fn compute(
        catalog: &dyn AccountCatalog,
        config: &EngineConfig,
        bootstrapping: bool,
        as_of: NaiveDate,
    ) -> Result<Self> {
        let canned = CannedPrincipals::compute(catalog, config, bootstrapping, as_of).await?;
        Self::from_principals(&canned, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{Account, Organization};
    use crate::memory::InMemoryOrganization;

    fn organization() -> InMemoryOrganization {
        InMemoryOrganization::new(Organization {
            id: "o-example".to_string(),
            management_account_id: "000000000000".to_string(),
        })
        .with_account(Account::new("000000000000", "management"))
        .with_account(Account::service("222222222222", "admin", "admin", "default"))
        .with_account(Account::service("333333333333", "svc", "production", "default"))
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_bootstrapping_principals() {
        let org = organization();
        let canned = CannedPrincipals::compute(&org, &EngineConfig::default(), true, as_of())
            .await
            .unwrap();
        assert_eq!(
            canned.admin,
            vec![
                "arn:aws:iam::000000000000:role/OrganizationAdministrator",
                "arn:aws:iam::000000000000:user/OrganizationAdministrator",
                "arn:aws:iam::222222222222:role/Administrator",
            ]
        );
        assert_eq!(canned.auditor.len(), 4);
        assert_eq!(
            canned.org_accounts,
            vec!["000000000000", "222222222222", "333333333333"]
        );
    }

    #[tokio::test]
    async fn test_mature_principals_are_a_superset() {
        let org = organization();
        let config = EngineConfig::default();
        let bootstrapping = CannedPrincipals::compute(&org, &config, true, as_of()).await.unwrap();
        let mature = CannedPrincipals::compute(&org, &config, false, as_of()).await.unwrap();

        for arn in &bootstrapping.admin {
            assert!(mature.admin.contains(arn));
        }
        assert!(mature.admin.contains(&"arn:aws:iam::222222222222:role/Intranet".to_string()));
        assert!(mature
            .admin
            .contains(&"arn:aws:iam::222222222222:role/orgtrust-intranet".to_string()));
        assert!(mature.auditor.contains(&"arn:aws:iam::222222222222:role/Auditor".to_string()));
    }

    #[tokio::test]
    async fn test_expired_alias_is_dropped() {
        let org = organization();
        let later = NaiveDate::from_ymd_opt(2028, 1, 1).unwrap();
        let mature = CannedPrincipals::compute(&org, &EngineConfig::default(), false, later)
            .await
            .unwrap();
        assert!(!mature.admin.iter().any(|arn| arn.ends_with("orgtrust-intranet")));
    }

    #[tokio::test]
    async fn test_listing_failure_is_aggregation_error() {
        let org = organization().failing_listings();
        let err = CannedPrincipals::compute(&org, &EngineConfig::default(), true, as_of())
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::Aggregation(_)));
    }

    #[test]
    fn test_extra_policy_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(EXTRA_ADMINISTRATOR_POLICY),
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"AWS":"arn:aws:iam::444444444444:role/BreakGlass"},"Action":"sts:AssumeRole"}]}"#,
        )
        .unwrap();
        let config = EngineConfig {
            extra_policy_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let canned = CannedPrincipals {
            admin: vec!["arn:aws:iam::222222222222:role/Administrator".to_string()],
            ..Default::default()
        };

        let policies = CannedPolicies::from_principals(&canned, &config).unwrap();
        assert_eq!(policies.admin.statement.len(), 2);
        assert_eq!(policies.auditor.statement.len(), 1);
    }
}
