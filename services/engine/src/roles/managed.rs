//! Managed trust-policy and attachment flags
//!
//! The flag sets `create-role` accepts and the collator reconstructs. Like
//! `Selection`, they render to canonical arguments once sorted.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedAssumeRolePolicy {
    /// Humans may assume the role through the admin accounts
    pub humans: bool,
    pub aws_services: Vec<String>,
    /// `org/repo` pairs allowed through the GitHub Actions OIDC provider
    pub github_actions: Vec<String>,
    pub filenames: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagedPolicyAttachments {
    pub administrator: bool,
    pub read_only: bool,
    pub arns: Vec<String>,
    pub filenames: Vec<String>,
}

fn quoted(flag: &str, values: &[String], out: &mut Vec<String>) {
    for value in values {
        out.push(flag.to_string());
        out.push(format!("{:?}", value));
    }
}

impl ManagedAssumeRolePolicy {
    pub fn sort(&mut self) {
        self.aws_services.sort();
        self.github_actions.sort();
        self.filenames.sort();
    }

    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.humans {
            args.push("-humans".to_string());
        }
        quoted("-aws-service", &self.aws_services, &mut args);
        quoted("-github-actions", &self.github_actions, &mut args);
        quoted("-assume-role-policy", &self.filenames, &mut args);
        args
    }

    /// `sub` claim values for the GitHub Actions condition.
    pub fn github_actions_subjects(&self) -> Vec<String> {
        self.github_actions
            .iter()
            .map(|repo| format!("repo:{}:*", repo))
            .collect()
    }
}

impl ManagedPolicyAttachments {
    pub fn sort(&mut self) {
        self.arns.sort();
        self.filenames.sort();
    }

    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.administrator {
            args.push("-administrator-access".to_string());
        }
        if self.read_only {
            args.push("-read-only-access".to_string());
        }
        quoted("-policy-arn", &self.arns, &mut args);
        quoted("-policy", &self.filenames, &mut args);
        args
    }
}

impl fmt::Display for ManagedAssumeRolePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arguments().join(" "))
    }
}

impl fmt::Display for ManagedPolicyAttachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arguments().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_role_flags() {
        let mut flags = ManagedAssumeRolePolicy {
            humans: true,
            aws_services: vec!["lambda.amazonaws.com".into(), "ec2.amazonaws.com".into()],
            github_actions: vec!["acme/app".into()],
            filenames: vec![],
        };
        flags.sort();
        assert_eq!(
            flags.to_string(),
            r#"-humans -aws-service "ec2.amazonaws.com" -aws-service "lambda.amazonaws.com" -github-actions "acme/app""#
        );
        assert_eq!(flags.github_actions_subjects(), vec!["repo:acme/app:*"]);
    }

    #[test]
    fn test_attachment_flags() {
        let flags = ManagedPolicyAttachments {
            read_only: true,
            arns: vec!["arn:aws:iam::aws:policy/AWSXrayReadOnlyAccess".into()],
            ..Default::default()
        };
        assert_eq!(
            flags.to_string(),
            r#"-read-only-access -policy-arn "arn:aws:iam::aws:policy/AWSXrayReadOnlyAccess""#
        );
        assert_eq!(ManagedPolicyAttachments::default().to_string(), "");
    }
}
