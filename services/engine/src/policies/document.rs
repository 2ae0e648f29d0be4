//! IAM policy documents
//!
//! Serialization is deterministic: struct fields serialize in declaration
//! order, maps are `BTreeMap`s, and principal lists are kept sorted, so the
//! same logical document always produces the same JSON bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

/// Accepts either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

fn condition_values<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Values(#[serde(deserialize_with = "one_or_many")] Vec<String>);

    let raw = BTreeMap::<String, Values>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
}

/// Who a statement applies to. Lists are sorted and deduplicated on
/// construction and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Principal {
    #[serde(
        rename = "AWS",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub aws: Vec<String>,

    #[serde(
        rename = "Federated",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub federated: Vec<String>,

    #[serde(
        rename = "Service",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub service: Vec<String>,

    /// Principal kinds this engine does not model (e.g. `CanonicalUser`)
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

impl Principal {
    pub fn aws<I, S>(arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut principal = Self {
            aws: arns.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        principal.canonicalize();
        principal
    }

    pub fn service<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut principal = Self {
            service: services.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        principal.canonicalize();
        principal
    }

    pub fn federated(provider_arn: impl Into<String>) -> Self {
        Self {
            federated: vec![provider_arn.into()],
            ..Default::default()
        }
    }

    pub fn canonicalize(&mut self) {
        for list in [&mut self.aws, &mut self.federated, &mut self.service] {
            list.sort();
            list.dedup();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aws.is_empty()
            && self.federated.is_empty()
            && self.service.is_empty()
            && self.unrecognized.is_empty()
    }
}

/// Condition block: operator -> condition key -> values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(
        rename = "StringEquals",
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "condition_values"
    )]
    pub string_equals: BTreeMap<String, Vec<String>>,

    #[serde(
        rename = "StringLike",
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "condition_values"
    )]
    pub string_like: BTreeMap<String, Vec<String>>,

    /// Operators this engine does not model
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

impl Condition {
    pub fn string_equals(key: impl Into<String>, values: Vec<String>) -> Self {
        let mut condition = Self::default();
        condition.string_equals.insert(key.into(), values);
        condition
    }

    pub fn is_empty(&self) -> bool {
        self.string_equals.is_empty() && self.string_like.is_empty() && self.unrecognized.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "Effect", default)]
    pub effect: Effect,

    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    #[serde(rename = "Action", default, deserialize_with = "one_or_many")]
    pub action: Vec<String>,

    #[serde(
        rename = "Resource",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub resource: Vec<String>,

    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Statement {
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn deny<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Deny,
            ..Self::allow(actions, resources)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,

    #[serde(rename = "Statement", default)]
    pub statement: Vec<Statement>,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: default_version(),
            statement: Vec::new(),
        }
    }
}

impl Document {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: default_version(),
            statement,
        }
    }

    /// A trust policy allowing `principal` to call `sts:AssumeRole`.
    pub fn assume_role(principal: Principal) -> Self {
        Self::new(vec![Statement {
            principal: Some(principal),
            action: vec!["sts:AssumeRole".to_string()],
            ..Default::default()
        }])
    }

    /// Append `other`'s statements, skipping any statement already present.
    pub fn merge(mut self, other: &Document) -> Self {
        for statement in &other.statement {
            if !self.statement.contains(statement) {
                self.statement.push(statement.clone());
            }
        }
        self
    }

    /// Merge every document in order.
    pub fn merge_all<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Self {
        documents
            .into_iter()
            .fold(Document::default(), |merged, doc| merged.merge(doc))
    }

    pub fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut doc: Document = serde_json::from_str(raw)?;
        for statement in &mut doc.statement {
            if let Some(principal) = statement.principal.as_mut() {
                principal.canonicalize();
            }
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_role_document_json() {
        let doc = Document::assume_role(Principal::aws([
            "arn:aws:iam::222222222222:role/Administrator",
            "arn:aws:iam::111111111111:role/Administrator",
        ]));
        assert_eq!(
            doc.to_json().unwrap(),
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"AWS":["arn:aws:iam::111111111111:role/Administrator","arn:aws:iam::222222222222:role/Administrator"]},"Action":["sts:AssumeRole"]}]}"#
        );
    }

    #[test]
    fn test_parse_single_string_fields() {
        let raw = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Service": "ec2.amazonaws.com", "AWS": "123456789012"},
                "Action": "sts:AssumeRole"
            }]
        }"#;
        let doc = Document::from_json(raw).unwrap();
        let principal = doc.statement[0].principal.as_ref().unwrap();
        assert_eq!(principal.service, vec!["ec2.amazonaws.com"]);
        assert_eq!(principal.aws, vec!["123456789012"]);
        assert_eq!(doc.statement[0].action, vec!["sts:AssumeRole"]);
    }

    #[test]
    fn test_unrecognized_condition_operators_survive() {
        let raw = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Federated": "arn:aws:iam::123456789012:oidc-provider/token.actions.githubusercontent.com"},
                "Action": "sts:AssumeRoleWithWebIdentity",
                "Condition": {
                    "StringEquals": {"token.actions.githubusercontent.com:sub": "repo:acme/app:*"},
                    "IpAddress": {"aws:SourceIp": ["10.0.0.0/8"]}
                }
            }]
        }"#;
        let doc = Document::from_json(raw).unwrap();
        let condition = doc.statement[0].condition.as_ref().unwrap();
        assert_eq!(
            condition.string_equals["token.actions.githubusercontent.com:sub"],
            vec!["repo:acme/app:*"]
        );
        assert!(condition.unrecognized.contains_key("IpAddress"));

        let reparsed = Document::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_merge_skips_identical_statements() {
        let a = Document::new(vec![Statement::allow(["s3:GetObject"], ["*"])]);
        let b = Document::new(vec![
            Statement::allow(["s3:GetObject"], ["*"]),
            Statement::deny(["s3:PutObject"], ["*"]),
        ]);

        let merged = a.clone().merge(&b);
        assert_eq!(merged.statement.len(), 2);
        assert_eq!(merged.statement[1].effect, Effect::Deny);

        let remerged = merged.clone().merge(&merged);
        assert_eq!(remerged, merged);
    }

    #[test]
    fn test_principal_canonicalize() {
        let principal = Principal::aws(["b", "a", "b"]);
        assert_eq!(principal.aws, vec!["a", "b"]);
    }
}
