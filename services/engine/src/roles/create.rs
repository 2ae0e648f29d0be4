//! Create Role
//!
//! Ensures one named role in every account a `Selection` picks, with a trust
//! policy assembled from the canned administrator principals and the
//! requested assume-role flags. Every role is tagged with the selectors that
//! chose its account and the fragment filenames it was built from, which is
//! what lets the collator rebuild the request later.

use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use super::client::{ClientFactory, RoleCapabilities};
use super::managed::{ManagedAssumeRolePolicy, ManagedPolicyAttachments};
use crate::accounts::{
    AccountCatalog, AccountType, AccountWithSelectors, GroupedAccounts, Selection, Selector,
    SpecialAccount,
};
use crate::error::{OrgError, Result};
use crate::naming::{managed_policies, role_arn, roles, user_arn, users, EC2_SERVICE};
use crate::policies::{self, Condition, Document, Principal, Statement};
use crate::principals::CannedPolicies;
use crate::tagging::{self, TagMap};

#[derive(Debug, Clone, Default)]
pub struct CreateRoleRequest {
    pub role_name: String,
    pub selection: Selection,
    pub assume_role_policy: ManagedAssumeRolePolicy,
    pub attachments: ManagedPolicyAttachments,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRoleReport {
    /// ARNs of every role ensured, in processing order
    pub role_arns: Vec<String>,
    pub unreachable: Vec<String>,
    pub warnings: Vec<String>,
}

impl CreateRoleRequest {
    pub fn new(role_name: impl Into<String>, selection: Selection) -> Self {
        Self {
            role_name: role_name.into(),
            selection,
            ..Default::default()
        }
    }

    pub fn with_assume_role_policy(mut self, flags: ManagedAssumeRolePolicy) -> Self {
        self.assume_role_policy = flags;
        self
    }

    pub fn with_attachments(mut self, flags: ManagedPolicyAttachments) -> Self {
        self.attachments = flags;
        self
    }

    /// Parse `create-role` arguments, the form `CollatedRole::command` renders.
    ///
    /// Flags take one or two leading dashes and list flags repeat.
    pub fn from_arguments<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut request = Self::default();
        let mut args = args.iter().map(AsRef::as_ref);
        while let Some(arg) = args.next() {
            let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
                return Err(OrgError::Validation(format!("unexpected argument {:?}", arg)));
            };
            let mut value = || {
                args.next()
                    .map(str::to_string)
                    .ok_or_else(|| OrgError::Validation(format!("-{} requires a value", flag)))
            };
            let selection = &mut request.selection;
            let trust = &mut request.assume_role_policy;
            let attachments = &mut request.attachments;
            match flag {
                "role" => request.role_name = value()?,
                "all-domains" => selection.all_domains = true,
                "domain" => selection.domains.push(value()?),
                "all-environments" => selection.all_environments = true,
                "environment" => selection.environments.push(value()?),
                "all-qualities" => selection.all_qualities = true,
                "quality" => selection.qualities.push(value()?),
                "substrate" => selection.substrate = true,
                "admin" => selection.admin = true,
                "management" => selection.management = true,
                "special" => selection.specials.push(value()?),
                "number" => selection.numbers.push(value()?),
                "humans" => trust.humans = true,
                "aws-service" => trust.aws_services.push(value()?),
                "github-actions" => trust.github_actions.push(value()?),
                "assume-role-policy" => trust.filenames.push(value()?),
                "administrator-access" => attachments.administrator = true,
                "read-only-access" => attachments.read_only = true,
                "policy-arn" => attachments.arns.push(value()?),
                "policy" => attachments.filenames.push(value()?),
                other => return Err(OrgError::Validation(format!("unknown flag -{}", other))),
            }
        }
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.role_name.is_empty() {
            return Err(OrgError::Validation("a role name is required".into()));
        }
        if let Some(repo) = self
            .assume_role_policy
            .github_actions
            .iter()
            .find(|repo| !repo.contains('/'))
        {
            return Err(OrgError::Validation(format!(
                "GitHub Actions repository {:?} must be of the form org/repo",
                repo
            )));
        }
        Ok(())
    }
}

/// The statement that lets humans in through an admin account's federated role.
pub fn humans_statement(admin_account_id: &str) -> Document {
    let mut principal = Principal::aws([
        role_arn(admin_account_id, roles::INTRANET),
        user_arn(admin_account_id, users::CREDENTIAL_FACTORY),
    ]);
    principal.service = vec![EC2_SERVICE.to_string()];
    Document::assume_role(principal)
}

/// Trust for GitHub Actions workflows in `subjects` through the OIDC provider `provider_arn`.
pub fn github_actions_statement(provider_arn: &str, host: &str, subjects: Vec<String>) -> Document {
    Document::new(vec![Statement {
        principal: Some(Principal::federated(provider_arn)),
        action: vec!["sts:AssumeRoleWithWebIdentity".to_string()],
        condition: Some(Condition::string_equals(format!("{}:sub", host), subjects)),
        ..Default::default()
    }])
}

fn read_fragments(filenames: &[String]) -> Result<Vec<Document>> {
    filenames
        .iter()
        .map(|filename| {
            let raw = std::fs::read_to_string(Path::new(filename)).map_err(|e| {
                OrgError::Validation(format!("reading policy fragment {:?}: {}", filename, e))
            })?;
            Document::from_json(&raw)
        })
        .collect()
}

/// Accounts selected only so humans can reach the role; they get no extra grants.
fn humans_only(selected: &AccountWithSelectors) -> bool {
    selected.selectors.contains(Selector::Humans)
        && !selected.selectors.contains(Selector::Admin)
        && !selected.selectors.contains(Selector::Substrate)
}

fn is_identity_account(selected: &AccountWithSelectors) -> bool {
    matches!(
        selected.account.account_type(),
        AccountType::Admin | AccountType::Special(SpecialAccount::Substrate)
    )
}

/// Always written, empty when there are no values, so a re-create clears the old list.
fn join_tag(tags: &mut TagMap, key: &str, values: &[String]) {
    tags.insert(key.to_string(), values.join(" "));
}

fn desired_policy_arns(attachments: &ManagedPolicyAttachments) -> Vec<String> {
    let mut arns = Vec::new();
    if attachments.administrator {
        arns.push(managed_policies::ADMINISTRATOR_ACCESS.to_string());
    }
    if attachments.read_only {
        arns.push(managed_policies::READ_ONLY_ACCESS.to_string());
    }
    arns.extend(attachments.arns.iter().cloned());
    arns
}

pub async fn create_role(
    factory: &ClientFactory,
    catalog: &dyn AccountCatalog,
    request: &CreateRoleRequest,
    as_of: NaiveDate,
) -> Result<CreateRoleReport> {
    request.validate()?;
    let config = factory.config();

    let mut selection = request.selection.clone();
    selection.humans |= request.assume_role_policy.humans;
    selection.sort(config);

    let mut flags = request.assume_role_policy.clone();
    flags.sort();
    let mut attachments = request.attachments.clone();
    attachments.sort();

    let grouped = GroupedAccounts::load(catalog).await?;
    let mut partition = selection.partition(&grouped)?;
    let canned = CannedPolicies::compute(catalog, config, false, as_of).await?;

    let trust_fragments = read_fragments(&flags.filenames)?;
    let policy_fragments = read_fragments(&attachments.filenames)?;
    let mut inline_policy = policies::minimal();
    for fragment in &policy_fragments {
        inline_policy = inline_policy.merge(fragment);
    }

    // Identity accounts first, so their ARNs can be trusted everywhere else.
    partition.selected.sort_by_key(|selected| !is_identity_account(selected));

    let mut report = CreateRoleReport {
        warnings: std::mem::take(&mut partition.warnings),
        ..Default::default()
    };
    let mut human_principals = Vec::new();

    for selected in &partition.selected {
        let account = &selected.account;
        let client = match factory.for_account(account).await {
            Ok(client) => client,
            Err(OrgError::UnreachableAccount { account_id, reason }) => {
                warn!(account_id = %account_id, reason = %reason, "Skipping unreachable account");
                report.unreachable.push(account_id);
                continue;
            }
            Err(e) => return Err(e),
        };

        let identity = is_identity_account(selected) && selection.humans;
        let limited = humans_only(selected);

        let mut trust = canned.admin.clone();
        if identity {
            trust = trust.merge(&humans_statement(&account.id));
        } else if !human_principals.is_empty() {
            let humans = Principal::aws(human_principals.iter().cloned());
            trust = trust.merge(&Document::assume_role(humans));
        }
        if !limited {
            if !flags.aws_services.is_empty() {
                let services = Principal::service(flags.aws_services.iter().cloned());
                trust = trust.merge(&Document::assume_role(services));
            }
            if !flags.github_actions.is_empty() {
                let provider = client.ensure_github_actions_provider().await?;
                trust = trust.merge(&github_actions_statement(
                    &provider,
                    config.github_oidc_host(),
                    flags.github_actions_subjects(),
                ));
            }
            for fragment in &trust_fragments {
                trust = trust.merge(fragment);
            }
        }

        let no_filenames = Vec::new();
        let (trust_filenames, policy_filenames) = if limited {
            (&no_filenames, &no_filenames)
        } else {
            (&flags.filenames, &attachments.filenames)
        };
        let mut tags = TagMap::new();
        tags.insert(tagging::ACCOUNT_SELECTORS.to_string(), selected.selectors.encode());
        join_tag(&mut tags, tagging::ASSUME_ROLE_POLICY_FILENAMES, trust_filenames);
        join_tag(&mut tags, tagging::POLICY_ATTACHMENT_FILENAMES, policy_filenames);

        let policy = if limited { policies::minimal() } else { inline_policy.clone() };
        let role = client
            .ensure_role_with_policy(&request.role_name, &trust, &policy, &tags)
            .await?;

        let desired = if limited { Vec::new() } else { desired_policy_arns(&attachments) };
        for arn in &desired {
            client.attach_policy(&request.role_name, arn).await?;
        }
        // Managed policies dropped from the request come off again.
        for arn in client.list_attached_role_policies(&request.role_name).await? {
            if !desired.contains(&arn) {
                client.detach_policy(&request.role_name, &arn).await?;
            }
        }

        if identity {
            human_principals.push(role.arn.clone());
        }
        info!(
            account_id = %account.id,
            role = %request.role_name,
            selectors = %selected.selectors,
            "Ensured role"
        );
        report.role_arns.push(role.arn);
    }

    Ok(report)
}
