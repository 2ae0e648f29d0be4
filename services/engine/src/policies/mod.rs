//! Policy Documents
//!
//! Typed IAM policy documents plus the fixed inline policies the
//! reconciler writes to the roles it manages.

mod document;

pub use document::{Condition, Document, Effect, Principal, Statement, POLICY_VERSION};

/// Read-only actions that expose data rather than configuration; denied to auditors.
const SENSITIVE_READ_ACTIONS: &[&str] = &[
    "athena:GetQueryResults",
    "cognito-identity:GetOpenIdToken",
    "cognito-identity:GetCredentialsForIdentity",
    "dynamodb:BatchGetItem",
    "dynamodb:GetItem",
    "dynamodb:Query",
    "dynamodb:Scan",
    "ec2:GetConsoleOutput",
    "ec2:GetConsoleScreenshot",
    "ecr:BatchGetImage",
    "ecr:GetDownloadUrlForLayer",
    "kinesis:GetRecords",
    "kms:Decrypt",
    "lambda:GetFunction",
    "rds:DownloadDBLogFilePortion",
    "s3:GetObject",
    "s3:GetObjectVersion",
    "secretsmanager:GetSecretValue",
    "sqs:ReceiveMessage",
    "ssm:GetParameter",
    "ssm:GetParameters",
    "ssm:GetParametersByPath",
];

/// Unrestricted access, bounded only by organization service control policies.
pub fn allow_all() -> Document {
    Document::new(vec![Statement::allow(["*"], ["*"])])
}

/// What a role needs to discover the organization's accounts.
pub fn organization_reader() -> Document {
    Document::new(vec![Statement::allow(
        [
            "organizations:DescribeAccount",
            "organizations:DescribeOrganization",
            "organizations:ListAccounts",
            "organizations:ListTagsForResource",
        ],
        ["*"],
    )])
}

pub fn cloudwatch_list_accounts() -> Document {
    Document::new(vec![Statement::allow(
        ["organizations:ListAccounts", "organizations:ListAccountsForParent"],
        ["*"],
    )])
}

/// Every created role gets at least this so it can use the engine itself.
pub fn minimal() -> Document {
    Document::new(vec![Statement::allow(
        ["organizations:DescribeOrganization", "sts:AssumeRole"],
        ["*"],
    )])
}

pub fn allow_assume_role() -> Document {
    Document::new(vec![Statement::allow(["sts:AssumeRole"], ["*"])])
}

pub fn deny_sensitive_reads() -> Document {
    Document::new(vec![Statement::deny(
        SENSITIVE_READ_ACTIONS.iter().copied(),
        ["*"],
    )])
}

/// Inline policy for `Auditor` roles outside the audit account.
pub fn auditor() -> Document {
    allow_assume_role().merge(&deny_sensitive_reads())
}

/// Inline policy for the audit account's `Auditor`, which may read the
/// CloudTrail bucket but never write under `AWSLogs/`.
pub fn cloudtrail_auditor(prefix: &str) -> Document {
    let bucket = format!("{}-cloudtrail", prefix);
    Document::new(vec![
        Statement::allow(
            [
                "s3:GetBucketLocation",
                "s3:GetObject",
                "s3:ListBucket",
                "s3:ListBucketMultipartUploads",
                "s3:ListMultipartUploadParts",
                "s3:AbortMultipartUpload",
                "s3:PutObject",
            ],
            ["*"],
        ),
        Statement::deny(["s3:PutObject"], [format!("arn:aws:s3:::{}/AWSLogs/*", bucket)]),
    ])
}

pub fn terraform_state_bucket(prefix: &str, region: &str) -> String {
    format!("{}-terraform-state-{}", prefix, region)
}

/// Inline policy for the role every account uses to reach centralized Terraform state.
pub fn terraform_state_manager(prefix: &str, regions: &[String], lock_table: &str) -> Document {
    let mut resources = Vec::with_capacity(regions.len() * 2);
    for region in regions {
        let bucket = terraform_state_bucket(prefix, region);
        resources.push(format!("arn:aws:s3:::{}", bucket));
        resources.push(format!("arn:aws:s3:::{}/*", bucket));
    }
    Document::new(vec![
        Statement::allow(
            ["dynamodb:GetItem", "dynamodb:PutItem", "dynamodb:DeleteItem"],
            [format!("arn:aws:dynamodb:*:*:table/{}", lock_table)],
        ),
        Statement::allow(
            ["s3:DeleteObject", "s3:GetObject", "s3:ListBucket", "s3:PutObject"],
            resources,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auditor_denies_secret_reads() {
        let doc = auditor();
        assert_eq!(doc.statement.len(), 2);
        assert_eq!(doc.statement[1].effect, Effect::Deny);
        assert!(doc.statement[1]
            .action
            .contains(&"secretsmanager:GetSecretValue".to_string()));
    }

    #[test]
    fn test_terraform_state_resources_per_region() {
        let regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
        let doc = terraform_state_manager("acme", &regions, "locks");
        assert_eq!(
            doc.statement[1].resource,
            vec![
                "arn:aws:s3:::acme-terraform-state-us-east-1",
                "arn:aws:s3:::acme-terraform-state-us-east-1/*",
                "arn:aws:s3:::acme-terraform-state-eu-west-1",
                "arn:aws:s3:::acme-terraform-state-eu-west-1/*",
            ]
        );
        assert_eq!(doc.statement[0].resource, vec!["arn:aws:dynamodb:*:*:table/locks"]);
    }

    #[test]
    fn test_cloudtrail_auditor_denies_log_writes() {
        let doc = cloudtrail_auditor("acme");
        assert_eq!(
            doc.statement[1].resource,
            vec!["arn:aws:s3:::acme-cloudtrail/AWSLogs/*"]
        );
    }
}
