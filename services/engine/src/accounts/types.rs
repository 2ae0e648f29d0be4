//! Account and organization types

use serde::{Deserialize, Serialize};

use crate::naming::{roles, ADMIN_DOMAIN};
use crate::tagging::{self, TagMap};

/// The fixed set of special-purpose account types, by their tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialAccount {
    Management,
    Audit,
    Deploy,
    Network,
    /// The identity-broker account that replaces per-quality admin accounts
    Substrate,
}

impl SpecialAccount {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialAccount::Management => "management",
            SpecialAccount::Audit => "audit",
            SpecialAccount::Deploy => "deploy",
            SpecialAccount::Network => "network",
            SpecialAccount::Substrate => "substrate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "management" => Some(SpecialAccount::Management),
            "audit" => Some(SpecialAccount::Audit),
            "deploy" => Some(SpecialAccount::Deploy),
            "network" => Some(SpecialAccount::Network),
            "substrate" => Some(SpecialAccount::Substrate),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpecialAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an account is treated by selection and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountType {
    Special(SpecialAccount),
    /// An ordinary account in the admin domain
    Admin,
    /// An ordinary domain/environment/quality account
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// 12-digit account number
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: TagMap,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: TagMap::new(),
        }
    }

    /// A placeholder for an account selected by raw number; it has no tags.
    pub fn numbered(id: impl Into<String>) -> Self {
        Self::new(id, String::new())
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Builder for an ordinary account tagged on all three axes.
    pub fn service(id: &str, domain: &str, environment: &str, quality: &str) -> Self {
        Self::new(id, format!("{}-{}-{}", domain, environment, quality))
            .with_tag(tagging::DOMAIN, domain)
            .with_tag(tagging::ENVIRONMENT, environment)
            .with_tag(tagging::QUALITY, quality)
    }

    pub fn special(id: &str, special: SpecialAccount) -> Self {
        Self::new(id, special.as_str()).with_tag(tagging::SPECIAL_ACCOUNT, special.as_str())
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn domain(&self) -> Option<&str> {
        self.tag(tagging::DOMAIN)
    }

    pub fn environment(&self) -> Option<&str> {
        self.tag(tagging::ENVIRONMENT)
    }

    pub fn quality(&self) -> Option<&str> {
        self.tag(tagging::QUALITY)
    }

    pub fn special_account(&self) -> Option<SpecialAccount> {
        self.tag(tagging::SPECIAL_ACCOUNT).and_then(SpecialAccount::parse)
    }

    /// Accounts without a `Domain` tag are not yet onboarded.
    pub fn is_onboarded(&self) -> bool {
        self.domain().is_some()
    }

    /// Account type, decided by the special-account tag first and the domain second.
    pub fn account_type(&self) -> AccountType {
        if let Some(special) = self.special_account() {
            AccountType::Special(special)
        } else if self.domain() == Some(ADMIN_DOMAIN) {
            AccountType::Admin
        } else {
            AccountType::Service
        }
    }

    /// The administrator-class role that already exists in this account.
    pub fn administrator_role_name(&self) -> &'static str {
        match self.account_type() {
            AccountType::Special(SpecialAccount::Management) => roles::ORGANIZATION_ADMINISTRATOR,
            AccountType::Special(SpecialAccount::Deploy) => roles::DEPLOY_ADMINISTRATOR,
            AccountType::Special(SpecialAccount::Network) => roles::NETWORK_ADMINISTRATOR,
            AccountType::Special(SpecialAccount::Audit) => roles::AUDITOR,
            _ => roles::ADMINISTRATOR,
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "account {}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub management_account_id: String,
}

/// An account plus the selector tokens that explain why it was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountWithSelectors {
    pub account: Account,
    pub selectors: super::Selectors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_prefers_special_tag() {
        let deploy = Account::special("111111111111", SpecialAccount::Deploy)
            .with_tag(tagging::DOMAIN, "admin");
        assert_eq!(deploy.account_type(), AccountType::Special(SpecialAccount::Deploy));
        assert_eq!(deploy.administrator_role_name(), roles::DEPLOY_ADMINISTRATOR);

        let admin = Account::service("222222222222", "admin", "admin", "default");
        assert_eq!(admin.account_type(), AccountType::Admin);

        let svc = Account::service("333333333333", "svc", "production", "high");
        assert_eq!(svc.account_type(), AccountType::Service);
        assert_eq!(svc.administrator_role_name(), roles::ADMINISTRATOR);
    }

    #[test]
    fn test_empty_domain_tag_is_not_onboarded() {
        let account = Account::new("444444444444", "legacy").with_tag(tagging::DOMAIN, "");
        assert!(!account.is_onboarded());
    }
}
