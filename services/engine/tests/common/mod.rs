//! Shared organization fixture for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use orgtrust_engine::accounts::{Account, Organization, SpecialAccount};
use orgtrust_engine::naming::roles;
use orgtrust_engine::roles::{ClientFactory, Session};
use orgtrust_engine::{EngineConfig, InMemoryOrganization};

pub const MANAGEMENT: &str = "000000000000";
pub const AUDIT: &str = "111111111111";
pub const DEPLOY: &str = "222222222222";
pub const NETWORK: &str = "333333333333";
pub const ADMIN: &str = "444444444444";
pub const SVC_PRODUCTION: &str = "555555555555";
pub const SVC_STAGING: &str = "666666666666";
pub const WEB_PRODUCTION: &str = "777777777777";

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()
}

pub fn empty_organization() -> InMemoryOrganization {
    InMemoryOrganization::new(Organization {
        id: "o-example".to_string(),
        management_account_id: MANAGEMENT.to_string(),
    })
}

/// Management, audit, deploy and network accounts, one admin account and three service accounts.
pub fn organization() -> InMemoryOrganization {
    empty_organization()
        .with_account(Account::special(MANAGEMENT, SpecialAccount::Management))
        .with_account(Account::special(AUDIT, SpecialAccount::Audit))
        .with_account(Account::special(DEPLOY, SpecialAccount::Deploy))
        .with_account(Account::special(NETWORK, SpecialAccount::Network))
        .with_account(Account::service(ADMIN, "admin", "admin", "default"))
        .with_account(Account::service(SVC_PRODUCTION, "svc", "production", "default"))
        .with_account(Account::service(SVC_STAGING, "svc", "staging", "default"))
        .with_account(Account::service(WEB_PRODUCTION, "web", "production", "default"))
}

pub fn factory(org: &Arc<InMemoryOrganization>, config: EngineConfig) -> Arc<ClientFactory> {
    Arc::new(ClientFactory::new(
        org.clone(),
        org.clone(),
        Session::hub(MANAGEMENT, roles::ORGANIZATION_ADMINISTRATOR),
        config,
    ))
}
