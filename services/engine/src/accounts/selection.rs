//! Account Selection
//!
//! A `Selection` picks accounts along the domain, environment and quality
//! axes, plus flags for the identity, management and special accounts and
//! raw account numbers. Matching is pure; partitioning classifies every
//! grouped account exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::catalog::GroupedAccounts;
use super::selectors::{Selector, Selectors};
use super::types::{Account, AccountWithSelectors, SpecialAccount};
use crate::config::EngineConfig;
use crate::error::{OrgError, Result};
use crate::naming::indexed_sort;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    pub all_domains: bool,
    pub domains: Vec<String>,

    pub all_environments: bool,
    pub environments: Vec<String>,

    pub all_qualities: bool,
    pub qualities: Vec<String>,

    pub substrate: bool,
    pub admin: bool,
    /// Set from the humans assume-role flag; never rendered as an argument
    #[serde(skip)]
    pub humans: bool,

    pub management: bool,

    pub specials: Vec<String>,

    /// Raw 12-digit account numbers
    pub numbers: Vec<String>,
}

/// Outcome of `Selection::partition`.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub selected: Vec<AccountWithSelectors>,
    pub unselected: Vec<Account>,
    pub warnings: Vec<String>,
}

/// One axis of the match: `all` wins, then the allow-list, else the axis fails.
fn match_axis(
    all: bool,
    allowed: &[String],
    value: Option<&str>,
    all_token: Selector,
    token: Selector,
) -> Option<Selector> {
    if all {
        Some(all_token)
    } else if !allowed.is_empty() && value.is_some_and(|v| allowed.iter().any(|a| a == v)) {
        Some(token)
    } else {
        None
    }
}

fn quoted(flag: &str, values: &[String], out: &mut Vec<String>) {
    for value in values {
        out.push(flag.to_string());
        out.push(format!("{:?}", value));
    }
}

impl Selection {
    /// Match one account on the three axes; `None` if any axis fails.
    pub fn match_account(&self, account: &Account) -> Option<Selectors> {
        let domain = match_axis(
            self.all_domains,
            &self.domains,
            account.domain(),
            Selector::AllDomains,
            Selector::Domain,
        )?;
        let environment = match_axis(
            self.all_environments,
            &self.environments,
            account.environment(),
            Selector::AllEnvironments,
            Selector::Environment,
        )?;
        let quality = match_axis(
            self.all_qualities,
            &self.qualities,
            account.quality(),
            Selector::AllQualities,
            Selector::Quality,
        )?;
        Some(Selectors::new(vec![domain, environment, quality]))
    }

    /// Tokens for the identity accounts, in fixed order.
    fn identity_selectors(&self) -> Selectors {
        let mut selectors = Vec::new();
        if self.substrate {
            selectors.push(Selector::Substrate);
        }
        if self.admin {
            selectors.push(Selector::Admin);
        }
        if self.humans {
            selectors.push(Selector::Humans);
        }
        Selectors::new(selectors)
    }

    /// Every special in the selection, parsed; only deploy and network may be selected this way.
    pub fn special_accounts(&self) -> Result<Vec<SpecialAccount>> {
        self.specials
            .iter()
            .map(|special| match SpecialAccount::parse(special) {
                Some(s @ (SpecialAccount::Deploy | SpecialAccount::Network)) => Ok(s),
                Some(SpecialAccount::Audit) => Err(OrgError::Validation(
                    "creating additional roles in the audit account is not supported".into(),
                )),
                _ => Err(OrgError::Validation(format!(
                    "{:?} is not a special account that supports additional roles",
                    special
                ))),
            })
            .collect()
    }

    pub fn partition(&self, grouped: &GroupedAccounts) -> Result<Partition> {
        let specials = self.special_accounts()?;
        let mut partition = Partition::default();

        for account in &grouped.service {
            if !account.is_onboarded() {
                continue;
            }
            match self.match_account(account) {
                Some(selectors) => partition.selected.push(AccountWithSelectors {
                    account: account.clone(),
                    selectors,
                }),
                None => partition.unselected.push(account.clone()),
            }
        }

        let identity = self.identity_selectors();
        let identity_accounts = grouped.substrate.iter().chain(grouped.admin.iter());
        if identity.is_empty() {
            partition.unselected.extend(identity_accounts.cloned());
        } else {
            partition
                .selected
                .extend(identity_accounts.map(|account| AccountWithSelectors {
                    account: account.clone(),
                    selectors: identity.clone(),
                }));
        }

        match (&grouped.management, self.management) {
            (Some(account), true) => partition.selected.push(AccountWithSelectors {
                account: account.clone(),
                selectors: Selectors::one(Selector::Management),
            }),
            (Some(account), false) => partition.unselected.push(account.clone()),
            (None, true) => {
                return Err(OrgError::NotFound("the management account does not exist".into()))
            }
            (None, false) => {}
        }

        for (special, account) in [
            (SpecialAccount::Deploy, &grouped.deploy),
            (SpecialAccount::Network, &grouped.network),
        ] {
            let wanted = specials.contains(&special);
            match (account, wanted) {
                (Some(account), true) => partition.selected.push(AccountWithSelectors {
                    account: account.clone(),
                    selectors: Selectors::one(Selector::Special),
                }),
                (Some(account), false) => partition.unselected.push(account.clone()),
                (None, true) => {
                    return Err(OrgError::NotFound(format!(
                        "the {} account does not exist",
                        special
                    )))
                }
                (None, false) => {}
            }
        }

        if !self.numbers.is_empty() {
            let warning = "roles created in numbered accounts cannot be found again by listing \
                           the organization; they must be managed by hand from now on"
                .to_string();
            warn!(numbers = ?self.numbers, "{}", warning);
            partition.warnings.push(warning);
            for number in &self.numbers {
                partition.selected.push(AccountWithSelectors {
                    account: Account::numbered(number.clone()),
                    selectors: Selectors::one(Selector::Number),
                });
            }
        }

        Ok(partition)
    }

    /// Canonical order: domains, specials and numbers alphabetically;
    /// environments and qualities by their declared progression.
    pub fn sort(&mut self, config: &EngineConfig) {
        self.domains.sort();
        indexed_sort(&mut self.environments, &config.environments);
        indexed_sort(&mut self.qualities, &config.qualities);
        self.specials.sort();
        self.numbers.sort();
    }

    /// With no explicit quality and only one configured, every quality is implied.
    pub fn with_implied_qualities(mut self, config: &EngineConfig) -> Self {
        if self.qualities.is_empty() && config.qualities.len() == 1 {
            self.all_qualities = true;
        }
        self
    }

    /// Command-line arguments that reproduce this selection. Only stable after `sort`.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.all_domains {
            args.push("-all-domains".to_string());
        } else {
            quoted("-domain", &self.domains, &mut args);
        }
        if self.all_environments {
            args.push("-all-environments".to_string());
        } else {
            quoted("-environment", &self.environments, &mut args);
        }
        if self.all_qualities {
            args.push("-all-qualities".to_string());
        } else {
            quoted("-quality", &self.qualities, &mut args);
        }

        if self.substrate {
            args.push("-substrate".to_string());
        }
        if self.admin {
            args.push("-admin".to_string());
        }
        if self.management {
            args.push("-management".to_string());
        }

        quoted("-special", &self.specials, &mut args);
        quoted("-number", &self.numbers, &mut args);
        args
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arguments().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::types::Organization;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn grouped() -> GroupedAccounts {
        let organization = Organization {
            id: "o-example".to_string(),
            management_account_id: "000000000000".to_string(),
        };
        GroupedAccounts::from_accounts(
            vec![
                Account::new("000000000000", "management"),
                Account::special("111111111111", SpecialAccount::Audit),
                Account::special("222222222222", SpecialAccount::Deploy),
                Account::special("333333333333", SpecialAccount::Network),
                Account::service("444444444444", "admin", "admin", "default"),
                Account::service("555555555555", "svc", "production", "high"),
                Account::service("666666666666", "svc", "development", "high"),
                Account::new("777777777777", "invited"),
            ],
            &organization,
        )
    }

    #[test]
    fn test_match_on_all_three_axes() {
        let selection = Selection {
            domains: strings(&["svc"]),
            environments: strings(&["staging", "production"]),
            qualities: strings(&["high"]),
            ..Default::default()
        };

        let matching = Account::service("555555555555", "svc", "production", "high");
        assert_eq!(
            selection.match_account(&matching),
            Some(Selectors::new(vec![
                Selector::Domain,
                Selector::Environment,
                Selector::Quality
            ]))
        );

        let other = Account::service("555555555555", "other", "production", "high");
        assert_eq!(selection.match_account(&other), None);
    }

    #[test]
    fn test_unconstrained_axis_fails() {
        let selection = Selection {
            all_domains: true,
            all_environments: true,
            ..Default::default()
        };
        let account = Account::service("555555555555", "svc", "production", "high");
        assert_eq!(selection.match_account(&account), None);
    }

    #[test]
    fn test_all_tokens() {
        let selection = Selection {
            all_domains: true,
            all_environments: true,
            all_qualities: true,
            ..Default::default()
        };
        let account = Account::service("555555555555", "svc", "production", "high");
        assert_eq!(
            selection.match_account(&account).map(|s| s.encode()),
            Some("all-domains all-environments all-qualities".to_string())
        );
    }

    #[test]
    fn test_partition_classifies_each_account_once() {
        let selection = Selection {
            all_domains: true,
            environments: strings(&["production"]),
            all_qualities: true,
            admin: true,
            humans: true,
            specials: strings(&["deploy"]),
            ..Default::default()
        };

        let partition = selection.partition(&grouped()).unwrap();
        let selected: Vec<_> = partition
            .selected
            .iter()
            .map(|a| (a.account.id.as_str(), a.selectors.encode()))
            .collect();
        assert_eq!(
            selected,
            vec![
                ("555555555555", "all-domains environment all-qualities".to_string()),
                ("444444444444", "admin humans".to_string()),
                ("222222222222", "special".to_string()),
            ]
        );

        let unselected: Vec<_> = partition.unselected.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(unselected, vec!["666666666666", "000000000000", "333333333333"]);
        assert!(partition.warnings.is_empty());
    }

    #[test]
    fn test_audit_special_is_rejected() {
        let selection = Selection {
            specials: strings(&["audit"]),
            ..Default::default()
        };
        assert!(matches!(
            selection.partition(&grouped()),
            Err(OrgError::Validation(_))
        ));
    }

    #[test]
    fn test_numbers_are_selected_with_warning() {
        let selection = Selection {
            numbers: strings(&["999999999999"]),
            ..Default::default()
        };
        let partition = selection.partition(&grouped()).unwrap();
        let last = partition.selected.last().unwrap();
        assert_eq!(last.account, Account::numbered("999999999999"));
        assert_eq!(last.selectors, Selectors::one(Selector::Number));
        assert_eq!(partition.warnings.len(), 1);
    }

    #[test]
    fn test_sort_and_arguments() {
        let config = EngineConfig {
            qualities: strings(&["beta", "alpha"]),
            ..Default::default()
        };
        let mut selection = Selection {
            domains: strings(&["web", "api"]),
            environments: strings(&["production", "development"]),
            qualities: strings(&["alpha", "beta"]),
            management: true,
            humans: true,
            numbers: strings(&["222222222222", "111111111111"]),
            ..Default::default()
        };
        selection.sort(&config);

        assert_eq!(
            selection.to_string(),
            r#"-domain "api" -domain "web" -environment "development" -environment "production" -quality "beta" -quality "alpha" -management -number "111111111111" -number "222222222222""#
        );
    }

    #[test]
    fn test_single_quality_is_implied() {
        let selection = Selection::default().with_implied_qualities(&EngineConfig::default());
        assert!(selection.all_qualities);

        let config = EngineConfig {
            qualities: strings(&["alpha", "beta"]),
            ..Default::default()
        };
        assert!(!Selection::default().with_implied_qualities(&config).all_qualities);
    }
}
