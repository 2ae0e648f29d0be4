//! Collator
//!
//! The inverse of role creation: scans every managed role in the
//! organization and rebuilds, per role name, the selection and flags that
//! would reproduce it. Each derived list is membership-checked before append
//! and sorted at the end, so collating unchanged state twice gives identical
//! output.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::accounts::{Account, AccountCatalog, Selection, Selector, Selectors, SpecialAccount};
use crate::config::EngineConfig;
use crate::error::{OrgError, Result};
use crate::naming::{managed_policies, push_unique, roles, users, EC2_SERVICE};
use crate::policies::Statement;
use crate::roles::{
    ClientFactory, ManagedAssumeRolePolicy, ManagedPolicyAttachments, Role, UnreconciledAccount,
};
use crate::tagging::{self, split_words};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollatedRole {
    pub role_name: String,
    pub selection: Selection,
    pub assume_role_policy: ManagedAssumeRolePolicy,
    pub policy_attachments: ManagedPolicyAttachments,
    /// Every ARN this role name appears under, sorted
    pub role_arns: Vec<String>,
}

impl CollatedRole {
    /// The `create-role` invocation that would recreate this role.
    pub fn command(&self) -> String {
        let mut parts = vec![format!("create-role -role {:?}", self.role_name)];
        for flags in [
            self.selection.to_string(),
            self.assume_role_policy.to_string(),
            self.policy_attachments.to_string(),
        ] {
            if !flags.is_empty() {
                parts.push(flags);
            }
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollationReport {
    /// Sorted by role name
    pub roles: Vec<CollatedRole>,
    pub unreachable: Vec<UnreconciledAccount>,
    pub unknown_selectors: Vec<String>,
}

/// One managed role found in one account.
struct Found {
    account: Account,
    role: Role,
    policy_arns: Vec<String>,
}

async fn scan_account(factory: &ClientFactory, account: &Account) -> Result<Vec<Found>> {
    let client = factory.for_account(account).await?;
    let manager = &factory.config().manager_tag_value;
    let mut found = Vec::new();
    for role in client.list_roles().await? {
        if role.tags.get(tagging::MANAGER) != Some(manager) {
            continue;
        }
        if split_words(role.tags.get(tagging::ACCOUNT_SELECTORS)).next().is_none() {
            continue;
        }
        let policy_arns = client.list_attached_role_policies(&role.name).await?;
        found.push(Found {
            account: account.clone(),
            role,
            policy_arns,
        });
    }
    debug!(account_id = %account.id, roles = found.len(), "Scanned account");
    Ok(found)
}

/// The `sub`-claim repositories of a GitHub Actions statement, if it is one.
fn github_repositories<'a>(statement: &'a Statement, host: &str) -> Vec<&'a str> {
    let Some(principal) = statement.principal.as_ref() else {
        return Vec::new();
    };
    let provider_suffix = format!("/{}", host);
    if principal.federated.len() != 1 || !principal.federated[0].ends_with(&provider_suffix) {
        return Vec::new();
    }
    let Some(condition) = statement.condition.as_ref() else {
        return Vec::new();
    };
    condition
        .string_equals
        .get(&format!("{}:sub", host))
        .into_iter()
        .flatten()
        .filter_map(|value| value.strip_prefix("repo:")?.strip_suffix(":*"))
        .collect()
}

/// A statement granting the Intranet role, the CredentialFactory user and EC2 together.
fn is_humans_statement(statement: &Statement) -> bool {
    let Some(principal) = statement.principal.as_ref() else {
        return false;
    };
    let credential_factory = format!(":user/{}", users::CREDENTIAL_FACTORY);
    let intranet = format!(":role/{}", roles::INTRANET);
    principal.aws.iter().any(|arn| arn.ends_with(&credential_factory))
        && principal.aws.iter().any(|arn| arn.ends_with(&intranet))
        && principal.service.iter().any(|service| service == EC2_SERVICE)
}

#[derive(Default)]
struct Accumulator {
    collated: CollatedRole,
    unknown: Vec<String>,
}

impl Accumulator {
    fn selectors(&mut self, account: &Account, selectors: &Selectors) {
        let selection = &mut self.collated.selection;
        for selector in selectors.iter() {
            match selector {
                Selector::AllDomains => selection.all_domains = true,
                Selector::Domain => {
                    if let Some(domain) = account.domain() {
                        push_unique(&mut selection.domains, domain);
                    }
                }
                Selector::AllEnvironments => selection.all_environments = true,
                Selector::Environment => {
                    if let Some(environment) = account.environment() {
                        push_unique(&mut selection.environments, environment);
                    }
                }
                Selector::AllQualities => selection.all_qualities = true,
                Selector::Quality => {
                    if let Some(quality) = account.quality() {
                        push_unique(&mut selection.qualities, quality);
                    }
                }
                Selector::Substrate => selection.substrate = true,
                Selector::Admin => selection.admin = true,
                Selector::Humans => selection.humans = true,
                Selector::Management => selection.management = true,
                Selector::Special => {
                    if let Some(special) = account.special_account() {
                        push_unique(&mut selection.specials, special.as_str());
                    }
                }
                Selector::Number => push_unique(&mut selection.numbers, &account.id),
            }
        }
    }

    fn trust(&mut self, role: &Role, github_host: &str) -> Result<()> {
        let flags = &mut self.collated.assume_role_policy;
        for statement in &role.trust_policy()?.statement {
            if is_humans_statement(statement) {
                flags.humans = true;
                continue;
            }
            if let Some(principal) = statement.principal.as_ref() {
                for service in &principal.service {
                    push_unique(&mut flags.aws_services, service);
                }
            }
            for repository in github_repositories(statement, github_host) {
                push_unique(&mut flags.github_actions, repository);
            }
        }
        for filename in split_words(role.tags.get(tagging::ASSUME_ROLE_POLICY_FILENAMES)) {
            push_unique(&mut flags.filenames, filename);
        }
        Ok(())
    }

    fn attachments(&mut self, role: &Role, policy_arns: &[String]) {
        let flags = &mut self.collated.policy_attachments;
        for arn in policy_arns {
            match arn.as_str() {
                managed_policies::ADMINISTRATOR_ACCESS => flags.administrator = true,
                managed_policies::READ_ONLY_ACCESS => flags.read_only = true,
                other => push_unique(&mut flags.arns, other),
            }
        }
        for filename in split_words(role.tags.get(tagging::POLICY_ATTACHMENT_FILENAMES)) {
            push_unique(&mut flags.filenames, filename);
        }
    }

    fn finish(mut self, config: &EngineConfig) -> (CollatedRole, Vec<String>) {
        let collated = &mut self.collated;
        collated.selection.sort(config);
        collated.assume_role_policy.sort();
        collated.policy_attachments.sort();
        collated.role_arns.sort();
        (self.collated, self.unknown)
    }
}

fn collate_found(
    found: Vec<Found>,
    config: &EngineConfig,
) -> Result<(Vec<CollatedRole>, Vec<String>)> {
    let mut by_name: BTreeMap<String, Accumulator> = BTreeMap::new();
    for Found { account, role, policy_arns } in found {
        let acc = by_name.entry(role.name.clone()).or_default();
        acc.collated.role_name = role.name.clone();

        let raw = role.tags.get(tagging::ACCOUNT_SELECTORS).map(String::as_str);
        let decoded = Selectors::decode(raw.unwrap_or_default());
        for token in decoded.unknown {
            warn!(
                role = %role.name,
                account_id = %account.id,
                selector = %token,
                "Unknown account selector"
            );
            push_unique(&mut acc.unknown, &token);
        }
        acc.selectors(&account, &decoded.selectors);
        acc.trust(&role, config.github_oidc_host())?;
        acc.attachments(&role, &policy_arns);
        push_unique(&mut acc.collated.role_arns, &role.arn);
    }

    let mut collated = Vec::with_capacity(by_name.len());
    let mut unknown = Vec::new();
    for acc in by_name.into_values() {
        let (role, tokens) = acc.finish(config);
        collated.push(role);
        for token in tokens {
            push_unique(&mut unknown, &token);
        }
    }
    unknown.sort();
    Ok((collated, unknown))
}

/// Collate every managed role in the organization.
///
/// The audit account is skipped. Accounts that cannot be reached are
/// reported and do not abort the scan.
pub async fn collate(
    factory: &ClientFactory,
    catalog: &dyn AccountCatalog,
) -> Result<CollationReport> {
    let config = factory.config();
    let accounts = catalog
        .list_accounts()
        .await
        .map_err(|e| OrgError::aggregation("listing accounts", e))?;

    let scans: Vec<(String, Result<Vec<Found>>)> = stream::iter(
        accounts
            .iter()
            .filter(|account| account.special_account() != Some(SpecialAccount::Audit)),
    )
    .map(|account| async move { (account.id.clone(), scan_account(factory, account).await) })
    .buffered(config.concurrency)
    .collect()
    .await;

    let mut report = CollationReport::default();
    let mut found = Vec::new();
    for (account_id, scan) in scans {
        match scan {
            Ok(roles) => found.extend(roles),
            Err(OrgError::UnreachableAccount { reason, .. }) => {
                warn!(account_id = %account_id, reason = %reason, "Skipping unreachable account");
                report.unreachable.push(UnreconciledAccount { account_id, reason });
            }
            Err(e) => return Err(e),
        }
    }

    let (roles, unknown) = collate_found(found, config)?;
    report.roles = roles;
    report.unknown_selectors = unknown;
    info!(
        roles = report.roles.len(),
        unreachable = report.unreachable.len(),
        "Collated managed roles"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::{Document, Principal};
    use crate::roles::{github_actions_statement, humans_statement};
    use crate::tagging::TagMap;

    fn role(account_id: &str, name: &str, trust: &Document, tags: &[(&str, &str)]) -> Role {
        let mut map = TagMap::new();
        map.insert(tagging::MANAGER.to_string(), "OrgTrust".to_string());
        for (k, v) in tags {
            map.insert(k.to_string(), v.to_string());
        }
        Role {
            name: name.to_string(),
            arn: crate::naming::role_arn(account_id, name),
            assume_role_policy_document: trust.to_json().unwrap(),
            tags: map,
        }
    }

    #[test]
    fn test_collate_unions_across_accounts() {
        let config = EngineConfig::default();
        let administrator = "arn:aws:iam::000000000000:role/OrganizationAdministrator";
        let trust = Document::assume_role(Principal::aws([administrator]))
            .merge(&Document::assume_role(Principal::service(["lambda.amazonaws.com"])));
        let selectors = [(tagging::ACCOUNT_SELECTORS, "domain environment all-qualities tenant")];

        let prod = Account::service("555555555555", "svc", "production", "default");
        let dev = Account::service("666666666666", "svc", "development", "default");
        let found = vec![
            Found {
                account: prod.clone(),
                role: role(&prod.id, "Deployer", &trust, &selectors),
                policy_arns: vec![managed_policies::READ_ONLY_ACCESS.to_string()],
            },
            Found {
                account: dev.clone(),
                role: role(&dev.id, "Deployer", &trust, &selectors),
                policy_arns: vec![managed_policies::READ_ONLY_ACCESS.to_string()],
            },
        ];

        let (collated, unknown) = collate_found(found, &config).unwrap();
        assert_eq!(collated.len(), 1);
        let deployer = &collated[0];
        assert_eq!(deployer.selection.domains, vec!["svc"]);
        assert_eq!(deployer.selection.environments, vec!["development", "production"]);
        assert!(deployer.selection.all_qualities);
        assert_eq!(deployer.assume_role_policy.aws_services, vec!["lambda.amazonaws.com"]);
        assert!(deployer.policy_attachments.read_only);
        assert_eq!(unknown, vec!["tenant"]);
        assert_eq!(
            deployer.command(),
            r#"create-role -role "Deployer" -domain "svc" -environment "development" -environment "production" -all-qualities -aws-service "lambda.amazonaws.com" -read-only-access"#
        );
    }

    #[test]
    fn test_humans_and_github_actions_are_recognized() {
        let config = EngineConfig::default();
        let host = config.github_oidc_host().to_string();
        let trust = humans_statement("222222222222").merge(&github_actions_statement(
            &format!("arn:aws:iam::222222222222:oidc-provider/{}", host),
            &host,
            vec!["repo:acme/app:*".to_string()],
        ));
        let admin = Account::service("222222222222", "admin", "admin", "default");
        let found = vec![Found {
            account: admin.clone(),
            role: role(
                &admin.id,
                "Deployer",
                &trust,
                &[(tagging::ACCOUNT_SELECTORS, "admin humans")],
            ),
            policy_arns: vec![],
        }];

        let (collated, _) = collate_found(found, &config).unwrap();
        let flags = &collated[0].assume_role_policy;
        assert!(flags.humans);
        assert!(flags.aws_services.is_empty());
        assert_eq!(flags.github_actions, vec!["acme/app"]);
        assert!(collated[0].selection.admin);
        assert!(collated[0].selection.humans);
    }
}
