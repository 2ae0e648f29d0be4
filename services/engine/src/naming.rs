//! Well-known role and user names, and the ARNs built from them.

pub mod roles {
    pub const ADMINISTRATOR: &str = "Administrator";
    pub const AUDITOR: &str = "Auditor";
    /// The identity-provider federated role in admin accounts
    pub const INTRANET: &str = "Intranet";
    pub const ORGANIZATION_ADMINISTRATOR: &str = "OrganizationAdministrator";
    pub const ORGANIZATION_READER: &str = "OrganizationReader";
    /// The cloud provider's default cross-account access role
    pub const ORGANIZATION_ACCOUNT_ACCESS_ROLE: &str = "OrganizationAccountAccessRole";
    pub const DEPLOY_ADMINISTRATOR: &str = "DeployAdministrator";
    pub const NETWORK_ADMINISTRATOR: &str = "NetworkAdministrator";
    pub const TERRAFORM_STATE_MANAGER: &str = "TerraformStateManager";
    pub const CLOUDWATCH_SHARING: &str = "CloudWatch-CrossAccountSharingRole";
    pub const CLOUDWATCH_LIST_ACCOUNTS: &str = "CloudWatch-CrossAccountSharing-ListAccountsRole";
}

pub mod users {
    pub const ORGANIZATION_ADMINISTRATOR: &str = "OrganizationAdministrator";
    pub const CREDENTIAL_FACTORY: &str = "CredentialFactory";
}

pub mod managed_policies {
    pub const ADMINISTRATOR_ACCESS: &str = "arn:aws:iam::aws:policy/AdministratorAccess";
    pub const READ_ONLY_ACCESS: &str = "arn:aws:iam::aws:policy/ReadOnlyAccess";
    pub const VIEW_ONLY_ACCESS: &str = "arn:aws:iam::aws:policy/job-function/ViewOnlyAccess";
    pub const XRAY_READ_ONLY_ACCESS: &str = "arn:aws:iam::aws:policy/AWSXrayReadOnlyAccess";
    pub const CLOUDWATCH_READ_ONLY_ACCESS: &str = "arn:aws:iam::aws:policy/CloudWatchReadOnlyAccess";
    pub const CLOUDWATCH_DASHBOARDS_ACCESS: &str =
        "arn:aws:iam::aws:policy/CloudWatchAutomaticDashboardsAccess";
}

/// The admin domain; accounts tagged with it host the federated roles.
pub const ADMIN_DOMAIN: &str = "admin";

pub const EC2_SERVICE: &str = "ec2.amazonaws.com";
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";
pub const GITHUB_ACTIONS_THUMBPRINT: &str = "6938fd4d98bab03faadb97b34396831e3780aea1";

pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

pub fn user_arn(account_id: &str, user_name: &str) -> String {
    format!("arn:aws:iam::{}:user/{}", account_id, user_name)
}

pub fn oidc_provider_arn(account_id: &str, host: &str) -> String {
    format!("arn:aws:iam::{}:oidc-provider/{}", account_id, host)
}

/// Order `values` by their position in `progression`; values not declared
/// there sort after the declared ones, alphabetically.
pub fn indexed_sort(values: &mut [String], progression: &[String]) {
    values.sort_by(|a, b| {
        let ia = progression.iter().position(|p| p == a).unwrap_or(usize::MAX);
        let ib = progression.iter().position(|p| p == b).unwrap_or(usize::MAX);
        ia.cmp(&ib).then_with(|| a.cmp(b))
    });
}

/// Append `value` unless it is already present.
pub(crate) fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arns() {
        assert_eq!(
            role_arn("123456789012", roles::ADMINISTRATOR),
            "arn:aws:iam::123456789012:role/Administrator"
        );
        assert_eq!(
            user_arn("123456789012", users::CREDENTIAL_FACTORY),
            "arn:aws:iam::123456789012:user/CredentialFactory"
        );
    }

    #[test]
    fn test_indexed_sort_follows_progression() {
        let progression = vec![
            "development".to_string(),
            "staging".to_string(),
            "production".to_string(),
        ];
        let mut values = vec![
            "production".to_string(),
            "sandbox".to_string(),
            "development".to_string(),
            "staging".to_string(),
        ];
        indexed_sort(&mut values, &progression);
        assert_eq!(values, vec!["development", "staging", "production", "sandbox"]);
    }

    #[test]
    fn test_push_unique() {
        let mut values = vec!["a".to_string()];
        push_unique(&mut values, "a");
        push_unique(&mut values, "b");
        assert_eq!(values, vec!["a", "b"]);
    }
}
