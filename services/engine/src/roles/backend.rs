//! Session and IAM backends
//!
//! The engine never talks to a cloud provider directly. Role assumption and
//! role/policy storage sit behind these traits; the provider's "already
//! exists" and "no such entity" answers come back as `BackendError` variants.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};
use crate::policies::Document;
use crate::tagging::TagMap;

/// Temporary credentials returned by a role assumption.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// An authenticated context inside one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account_id: String,
    /// Role (or user) the session acts as
    pub principal_name: String,
    pub credentials: Option<Credentials>,
}

impl Session {
    /// The ambient credentials the engine was started with.
    pub fn hub(account_id: impl Into<String>, principal_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            principal_name: principal_name.into(),
            credentials: None,
        }
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Assume `role_name` in `account_id` starting from `from`.
    async fn assume_role(
        &self,
        from: &Session,
        account_id: &str,
        role_name: &str,
        duration: Duration,
    ) -> Result<Session, BackendError>;
}

/// A role as stored by the IAM backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub arn: String,
    /// Trust policy JSON exactly as last written
    pub assume_role_policy_document: String,
    #[serde(default)]
    pub tags: TagMap,
}

impl Role {
    pub fn trust_policy(&self) -> Result<Document> {
        Document::from_json(&self.assume_role_policy_document)
    }
}

/// Role and policy storage within one account, addressed by session.
#[async_trait]
pub trait IamBackend: Send + Sync {
    /// Fails with `AlreadyExists` if a role by that name exists.
    async fn create_role(
        &self,
        session: &Session,
        name: &str,
        assume_role_policy: &str,
        tags: &TagMap,
    ) -> Result<Role, BackendError>;

    /// Fails with `NoSuchEntity` if the role does not exist.
    async fn get_role(&self, session: &Session, name: &str) -> Result<Role, BackendError>;

    /// Add or overwrite tags; tags not named are left alone.
    async fn tag_role(&self, session: &Session, name: &str, tags: &TagMap)
        -> Result<(), BackendError>;

    async fn update_assume_role_policy(
        &self,
        session: &Session,
        name: &str,
        assume_role_policy: &str,
    ) -> Result<(), BackendError>;

    /// Replace the inline policy `policy_name` wholesale.
    async fn put_role_policy(
        &self,
        session: &Session,
        name: &str,
        policy_name: &str,
        policy: &str,
    ) -> Result<(), BackendError>;

    /// Attaching an already-attached policy is a no-op.
    async fn attach_role_policy(
        &self,
        session: &Session,
        name: &str,
        policy_arn: &str,
    ) -> Result<(), BackendError>;

    /// Fails with `NoSuchEntity` if the policy is not attached.
    async fn detach_role_policy(
        &self,
        session: &Session,
        name: &str,
        policy_arn: &str,
    ) -> Result<(), BackendError>;

    async fn list_roles(&self, session: &Session) -> Result<Vec<Role>, BackendError>;

    async fn list_attached_role_policies(
        &self,
        session: &Session,
        name: &str,
    ) -> Result<Vec<String>, BackendError>;

    /// Returns the provider ARN; fails with `AlreadyExists` if it exists.
    async fn create_open_id_connect_provider(
        &self,
        session: &Session,
        url: &str,
        client_ids: &[String],
        thumbprints: &[String],
    ) -> Result<String, BackendError>;
}
