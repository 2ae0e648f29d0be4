//! Tag keys and values shared by accounts and roles.
//!
//! The selector and filename tags are the round-trip channel between role
//! creation and collation; their keys and token vocabulary must not change.

use std::collections::BTreeMap;

pub type TagMap = BTreeMap<String, String>;

pub const DOMAIN: &str = "Domain";
pub const ENVIRONMENT: &str = "Environment";
pub const QUALITY: &str = "Quality";
pub const MANAGER: &str = "Manager";
pub const NAME: &str = "Name";

pub const ACCOUNT_SELECTORS: &str = "OrgTrustAccountSelectors";
pub const ASSUME_ROLE_POLICY_FILENAMES: &str = "OrgTrustAssumeRolePolicyFilenames";
pub const POLICY_ATTACHMENT_FILENAMES: &str = "OrgTrustPolicyAttachmentFilenames";
pub const SPECIAL_ACCOUNT: &str = "OrgTrustSpecialAccount";
pub const VERSION: &str = "OrgTrustVersion";

/// Split a space-joined tag value, dropping empty fields.
pub fn split_words(value: Option<&String>) -> impl Iterator<Item = &str> {
    value
        .map(|v| v.as_str())
        .unwrap_or_default()
        .split(' ')
        .filter(|word| !word.is_empty())
}

/// Tags every managed role carries.
pub fn standard_role_tags(role_name: &str, manager: &str) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(MANAGER.to_string(), manager.to_string());
    tags.insert(NAME.to_string(), role_name.to_string());
    tags.insert(VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string());
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words_skips_empty() {
        let value = "a.json  b.json ".to_string();
        let words: Vec<_> = split_words(Some(&value)).collect();
        assert_eq!(words, vec!["a.json", "b.json"]);
        assert_eq!(split_words(None).count(), 0);
    }

    #[test]
    fn test_standard_role_tags() {
        let tags = standard_role_tags("Deployer", "OrgTrust");
        assert_eq!(tags.get(MANAGER).map(String::as_str), Some("OrgTrust"));
        assert_eq!(tags.get(NAME).map(String::as_str), Some("Deployer"));
        assert!(tags.contains_key(VERSION));
    }
}
