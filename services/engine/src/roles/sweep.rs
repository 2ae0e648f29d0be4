//! Organization Sweep
//!
//! Converges the administrator and auditor role matrix across every account
//! in the organization, then the single cross-account Terraform state role.
//!
//! Ordinary accounts are reconciled by a bounded worker pool. A failure in one
//! account is recorded and the sweep moves on; a fatal error cancels the
//! accounts not yet started and aborts the sweep.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::client::{AccountClient, ClientFactory, RoleCapabilities};
use crate::accounts::{
    require_special_account, Account, AccountCatalog, AccountType, SpecialAccount,
};
use crate::error::{OrgError, Result};
use crate::naming::{managed_policies, role_arn, roles, user_arn, users};
use crate::policies::{self, Document, Principal};
use crate::principals::CannedPolicies;
use crate::tagging::TagMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreconciledAccount {
    pub account_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// ARNs of every role ensured, sorted
    pub ensured: Vec<String>,
    pub unreconciled: Vec<UnreconciledAccount>,
    /// Principals trusted by the Terraform state role, sorted
    pub terraform_principals: Vec<String>,
}

impl SweepReport {
    /// Keep going past a per-account failure; propagate fatal ones.
    fn isolate(&mut self, account_id: &str, result: Result<Vec<String>>) -> Result<()> {
        match result {
            Ok(arns) => {
                self.ensured.extend(arns);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    account_id,
                    error = %e,
                    "Could not reconcile account; it may have only half-joined the organization"
                );
                self.unreconciled.push(UnreconciledAccount {
                    account_id: account_id.to_string(),
                    reason: e.to_string(),
                });
                Ok(())
            }
        }
    }
}

/// Principals that run Terraform, one or two per account by type.
pub fn terraform_principals(accounts: &[Account], management_account_id: &str) -> Vec<String> {
    let mut principals = Vec::with_capacity(accounts.len());
    for account in accounts {
        let account_type = if account.id == management_account_id {
            AccountType::Special(SpecialAccount::Management)
        } else {
            account.account_type()
        };
        match account_type {
            AccountType::Special(SpecialAccount::Management) => {
                principals.push(role_arn(&account.id, roles::ORGANIZATION_ADMINISTRATOR));
                principals.push(user_arn(&account.id, users::ORGANIZATION_ADMINISTRATOR));
            }
            AccountType::Special(SpecialAccount::Deploy) => {
                principals.push(role_arn(&account.id, roles::DEPLOY_ADMINISTRATOR))
            }
            AccountType::Special(SpecialAccount::Network) => {
                principals.push(role_arn(&account.id, roles::NETWORK_ADMINISTRATOR))
            }
            AccountType::Special(SpecialAccount::Audit | SpecialAccount::Substrate) => {}
            AccountType::Admin | AccountType::Service => {
                principals.push(role_arn(&account.id, roles::ADMINISTRATOR))
            }
        }
    }
    principals.sort();
    principals.dedup();
    principals
}

async fn ensure_auditor(
    client: &AccountClient,
    trust: &Document,
    policy: &Document,
) -> Result<String> {
    let role = client
        .ensure_role_with_policy(roles::AUDITOR, trust, policy, &TagMap::new())
        .await?;
    client
        .attach_policy(roles::AUDITOR, managed_policies::READ_ONLY_ACCESS)
        .await?;
    Ok(role.arn)
}

async fn ensure_cloudwatch_sharing(
    client: &AccountClient,
    canned: &CannedPolicies,
) -> Result<String> {
    let role = client
        .ensure_role(roles::CLOUDWATCH_SHARING, &canned.org_accounts, &TagMap::new())
        .await?;
    for arn in [
        managed_policies::VIEW_ONLY_ACCESS,
        managed_policies::XRAY_READ_ONLY_ACCESS,
        managed_policies::CLOUDWATCH_READ_ONLY_ACCESS,
        managed_policies::CLOUDWATCH_DASHBOARDS_ACCESS,
    ] {
        client.attach_policy(roles::CLOUDWATCH_SHARING, arn).await?;
    }
    Ok(role.arn)
}

async fn reconcile_management(
    factory: &ClientFactory,
    canned: &CannedPolicies,
) -> Result<Vec<String>> {
    let client = factory.hub_client();
    let mut arns = Vec::new();
    arns.push(
        client
            .ensure_role_with_policy(
                roles::ORGANIZATION_ADMINISTRATOR,
                &canned.admin,
                &policies::allow_all(),
                &TagMap::new(),
            )
            .await?
            .arn,
    );
    arns.push(
        client
            .ensure_role_with_policy(
                roles::ORGANIZATION_READER,
                &canned.org_accounts,
                &policies::organization_reader(),
                &TagMap::new(),
            )
            .await?
            .arn,
    );
    if factory.config().cloudwatch_sharing {
        arns.push(
            client
                .ensure_role_with_policy(
                    roles::CLOUDWATCH_LIST_ACCOUNTS,
                    &canned.org_accounts,
                    &policies::cloudwatch_list_accounts(),
                    &TagMap::new(),
                )
                .await?
                .arn,
        );
    }
    Ok(arns)
}

async fn reconcile_audit(
    factory: &ClientFactory,
    audit: &Account,
    canned: &CannedPolicies,
) -> Result<Vec<String>> {
    let client = factory.for_account(audit).await?;
    let policy = policies::cloudtrail_auditor(&factory.config().prefix);
    Ok(vec![ensure_auditor(&client, &canned.auditor, &policy).await?])
}

/// Deploy and network accounts: their own administrator role plus an auditor.
async fn reconcile_special(
    factory: &ClientFactory,
    account: &Account,
    canned: &CannedPolicies,
) -> Result<Vec<String>> {
    let client = factory
        .assume_into(&account.id, &[roles::ORGANIZATION_ACCOUNT_ACCESS_ROLE])
        .await?;
    let administrator = client
        .ensure_role_with_policy(
            account.administrator_role_name(),
            &canned.admin,
            &policies::allow_all(),
            &TagMap::new(),
        )
        .await?;
    let auditor = ensure_auditor(&client, &canned.org_accounts, &policies::auditor()).await?;
    Ok(vec![administrator.arn, auditor])
}

/// One account's share of the worker pool. Steps run in order.
async fn reconcile_account(
    factory: Arc<ClientFactory>,
    canned: Arc<CannedPolicies>,
    account: Account,
    ordinary: bool,
) -> Result<Vec<String>> {
    let client = factory.for_account(&account).await?;
    let mut arns = Vec::new();
    if ordinary {
        arns.push(
            client
                .ensure_role_with_policy(
                    roles::ADMINISTRATOR,
                    &canned.admin,
                    &policies::allow_all(),
                    &TagMap::new(),
                )
                .await?
                .arn,
        );
        arns.push(ensure_auditor(&client, &canned.auditor, &policies::auditor()).await?);
    }
    if factory.config().cloudwatch_sharing {
        arns.push(ensure_cloudwatch_sharing(&client, &canned).await?);
    }
    debug!(account_id = %account.id, roles = arns.len(), "Reconciled account");
    Ok(arns)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(_) => "non-string panic payload".to_string(),
    }
}

/// Run `work` on a bounded pool, folding each outcome into `report`.
///
/// A panicking item is recorded as unreconciled like any other per-account
/// failure. The first fatal error stops items not yet started.
async fn run_pool<Fut>(
    concurrency: usize,
    work: Vec<(String, Fut)>,
    report: &mut SweepReport,
) -> Result<()>
where
    Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for (account_id, item) in work {
        let semaphore = Arc::clone(&semaphore);
        let cancelled = Arc::clone(&cancelled);
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (account_id, None);
            };
            if cancelled.load(Ordering::Relaxed) {
                return (account_id, None);
            }
            let result = AssertUnwindSafe(item)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(OrgError::Panicked(panic_message(payload))));
            if matches!(&result, Err(e) if e.is_fatal()) {
                cancelled.store(true, Ordering::Relaxed);
            }
            (account_id, Some(result))
        });
    }

    let mut fatal = None;
    while let Some(joined) = tasks.join_next().await {
        let (account_id, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Account worker task failed");
                cancelled.store(true, Ordering::Relaxed);
                fatal.get_or_insert(OrgError::Panicked(e.to_string()));
                continue;
            }
        };
        let Some(result) = result else {
            debug!(account_id = %account_id, "Skipped after cancellation");
            continue;
        };
        if let Err(e) = report.isolate(&account_id, result) {
            fatal.get_or_insert(e);
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn reconcile_accounts(
    factory: &Arc<ClientFactory>,
    canned: &Arc<CannedPolicies>,
    accounts: Vec<(Account, bool)>,
    report: &mut SweepReport,
) -> Result<()> {
    let work = accounts
        .into_iter()
        .map(|(account, ordinary)| {
            let item = reconcile_account(
                Arc::clone(factory),
                Arc::clone(canned),
                account.clone(),
                ordinary,
            );
            (account.id, item)
        })
        .collect();
    run_pool(factory.config().concurrency, work, report).await
}

/// Converge every administrator, auditor and Terraform state role.
pub async fn sweep(
    factory: Arc<ClientFactory>,
    catalog: &dyn AccountCatalog,
    bootstrapping: bool,
    as_of: NaiveDate,
) -> Result<SweepReport> {
    let config = factory.config();
    let canned = Arc::new(CannedPolicies::compute(catalog, config, bootstrapping, as_of).await?);
    let accounts = catalog
        .list_accounts()
        .await
        .map_err(|e| OrgError::aggregation("listing accounts", e))?;
    let organization = catalog
        .describe_organization()
        .await
        .map_err(|e| OrgError::aggregation("describing the organization", e))?;
    let management_id = organization.management_account_id.as_str();

    let audit = require_special_account(catalog, SpecialAccount::Audit).await?;
    let deploy = require_special_account(catalog, SpecialAccount::Deploy).await?;
    let network = require_special_account(catalog, SpecialAccount::Network).await?;

    info!(accounts = accounts.len(), bootstrapping, "Sweeping organization roles");
    let mut report = SweepReport::default();

    let result = reconcile_management(&factory, &canned).await;
    report.isolate(management_id, result)?;
    let result = reconcile_audit(&factory, &audit, &canned).await;
    report.isolate(&audit.id, result)?;
    for special in [&deploy, &network] {
        let result = reconcile_special(&factory, special, &canned).await;
        report.isolate(&special.id, result)?;
    }

    let work: Vec<(Account, bool)> = accounts
        .iter()
        .filter(|account| account.id != management_id)
        .filter_map(|account| {
            let ordinary = account.special_account().is_none()
                && account.account_type() != AccountType::Admin;
            (ordinary || config.cloudwatch_sharing).then(|| (account.clone(), ordinary))
        })
        .collect();
    if config.cloudwatch_sharing {
        let result = ensure_cloudwatch_sharing(&factory.hub_client(), &canned)
            .await
            .map(|arn| vec![arn]);
        report.isolate(management_id, result)?;
    }
    reconcile_accounts(&factory, &canned, work, &mut report).await?;

    report.terraform_principals = terraform_principals(&accounts, management_id);
    let deploy_client = factory
        .assume_into(&deploy.id, &[roles::ORGANIZATION_ACCOUNT_ACCESS_ROLE])
        .await?;
    let terraform = deploy_client
        .ensure_role_with_policy(
            roles::TERRAFORM_STATE_MANAGER,
            &Document::assume_role(Principal::aws(report.terraform_principals.iter().cloned())),
            &policies::terraform_state_manager(
                &config.prefix,
                &config.regions,
                &config.terraform_lock_table,
            ),
            &TagMap::new(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Could not ensure the Terraform state role");
            e
        })?;
    report.ensured.push(terraform.arn);

    report.ensured.sort();
    report.unreconciled.sort_by(|a, b| a.account_id.cmp(&b.account_id));
    info!(
        ensured = report.ensured.len(),
        unreconciled = report.unreconciled.len(),
        "Organization sweep complete"
    );
    Ok(report)
}
