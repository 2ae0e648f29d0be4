//! Engine Configuration
//!
//! Every operation takes an `&EngineConfig`; nothing in the engine reads
//! process-wide state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrgError, Result};

/// A legacy role name that stays trusted only until `expires_on`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprecatedAlias {
    pub role_name: String,
    pub expires_on: NaiveDate,
}

impl DeprecatedAlias {
    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        as_of < self.expires_on
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Organization-wide naming prefix (CloudTrail and Terraform state buckets)
    pub prefix: String,
    /// Declared progression of environments, earliest first
    pub environments: Vec<String>,
    /// Declared progression of qualities, lowest first
    pub qualities: Vec<String>,
    /// Regions in use
    pub regions: Vec<String>,
    /// Lifetime of assumed sessions in seconds
    pub session_duration_secs: u64,
    /// Maximum number of accounts reconciled or collated at once
    pub concurrency: usize,
    /// How long to wait between service quota polls in seconds
    pub quota_poll_interval_secs: u64,
    /// GitHub Actions OIDC issuer
    pub github_oidc_url: String,
    /// Legacy federation role name granted alongside the current one
    pub legacy_intranet_alias: Option<DeprecatedAlias>,
    /// Manage the CloudWatch cross-account sharing roles during a sweep
    pub cloudwatch_sharing: bool,
    /// Name of the single inline policy written to every managed role
    pub inline_policy_name: String,
    /// Value of the `Manager` tag on every managed role
    pub manager_tag_value: String,
    /// DynamoDB table holding Terraform state locks
    pub terraform_lock_table: String,
    /// Directory holding optional `*.assume-role-policy.json` overrides
    pub extra_policy_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: "orgtrust".to_string(),
            environments: vec![
                "development".to_string(),
                "staging".to_string(),
                "production".to_string(),
            ],
            qualities: vec!["default".to_string()],
            regions: vec!["us-east-1".to_string(), "us-west-2".to_string()],
            session_duration_secs: 3600,
            concurrency: 4,
            quota_poll_interval_secs: 60,
            github_oidc_url: "https://token.actions.githubusercontent.com".to_string(),
            legacy_intranet_alias: Some(DeprecatedAlias {
                role_name: "orgtrust-intranet".to_string(),
                expires_on: NaiveDate::from_ymd_opt(2027, 6, 30).unwrap_or(NaiveDate::MIN),
            }),
            cloudwatch_sharing: false,
            inline_policy_name: "OrgTrust".to_string(),
            manager_tag_value: "OrgTrust".to_string(),
            terraform_lock_table: "terraform-state-locks".to_string(),
            extra_policy_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading engine configuration");
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str::<EngineConfig>(&raw)?
            }
            None => EngineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(OrgError::Config("at least one environment is required".into()));
        }
        if self.qualities.is_empty() {
            return Err(OrgError::Config("at least one quality is required".into()));
        }
        for (axis, values) in [("environment", &self.environments), ("quality", &self.qualities)] {
            let mut seen = HashSet::new();
            for value in values {
                if !seen.insert(value) {
                    return Err(OrgError::Config(format!("duplicate {} {:?}", axis, value)));
                }
            }
        }
        if self.concurrency == 0 {
            return Err(OrgError::Config("concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    pub fn quota_poll_interval(&self) -> Duration {
        Duration::from_secs(self.quota_poll_interval_secs)
    }

    /// Hostname of the GitHub Actions OIDC issuer.
    pub fn github_oidc_host(&self) -> &str {
        let url = self.github_oidc_url.as_str();
        let url = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        url.split('/').next().unwrap_or(url)
    }

    /// The legacy alias, if it is still inside its migration window.
    pub fn active_legacy_alias(&self, as_of: NaiveDate) -> Option<&str> {
        self.legacy_intranet_alias
            .as_ref()
            .filter(|alias| alias.is_active(as_of))
            .map(|alias| alias.role_name.as_str())
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }
}
