//! Idempotent role convergence
//!
//! Every call is a full upsert: the role is fetched or created, then
//! re-tagged and given the complete desired trust policy whichever path was
//! taken, so out-of-band edits are overwritten on the next run.

use tracing::{debug, info};

use super::backend::{IamBackend, Role, Session};
use crate::config::EngineConfig;
use crate::error::{BackendError, OrgError, Result};
use crate::naming::{oidc_provider_arn, GITHUB_ACTIONS_THUMBPRINT, STS_AUDIENCE};
use crate::policies::Document;
use crate::tagging::{standard_role_tags, TagMap};

/// Fetch first so a converged role costs no create call. A lost create race
/// is recovered by fetching again.
async fn find_or_create(
    iam: &dyn IamBackend,
    session: &Session,
    name: &str,
    trust_json: &str,
    tags: &TagMap,
) -> Result<Role> {
    match iam.get_role(session, name).await {
        Ok(role) => return Ok(role),
        Err(BackendError::NoSuchEntity(_)) => {}
        Err(e) => return Err(e.into()),
    }

    match iam.create_role(session, name, trust_json, tags).await {
        Ok(role) => {
            info!(account_id = %session.account_id, role = %name, "Created role");
            Ok(role)
        }
        Err(BackendError::AlreadyExists(_)) => {
            debug!(
                account_id = %session.account_id,
                role = %name,
                "Role appeared concurrently; fetching"
            );
            iam.get_role(session, name).await.map_err(|e| match e {
                BackendError::NoSuchEntity(detail) => OrgError::Conflict(format!(
                    "role {} in account {} exists but cannot be fetched: {}",
                    name, session.account_id, detail
                )),
                other => other.into(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Create or update role `name` so it carries `trust` and the standard tags plus `extra_tags`.
pub async fn ensure_role(
    iam: &dyn IamBackend,
    session: &Session,
    config: &EngineConfig,
    name: &str,
    trust: &Document,
    extra_tags: &TagMap,
) -> Result<Role> {
    let trust_json = trust.to_json()?;
    let mut tags = standard_role_tags(name, &config.manager_tag_value);
    tags.extend(extra_tags.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut role = find_or_create(iam, session, name, &trust_json, &tags).await?;

    iam.tag_role(session, name, &tags).await?;
    iam.update_assume_role_policy(session, name, &trust_json).await?;

    role.tags.extend(tags);
    role.assume_role_policy_document = trust_json;
    debug!(account_id = %session.account_id, role = %name, "Ensured role");
    Ok(role)
}

/// `ensure_role`, then overwrite the role's single inline policy with `policy`.
pub async fn ensure_role_with_policy(
    iam: &dyn IamBackend,
    session: &Session,
    config: &EngineConfig,
    name: &str,
    trust: &Document,
    policy: &Document,
    extra_tags: &TagMap,
) -> Result<Role> {
    let role = ensure_role(iam, session, config, name, trust, extra_tags).await?;
    iam.put_role_policy(session, name, &config.inline_policy_name, &policy.to_json()?)
        .await?;
    Ok(role)
}

pub async fn attach_policy(
    iam: &dyn IamBackend,
    session: &Session,
    name: &str,
    policy_arn: &str,
) -> Result<()> {
    iam.attach_role_policy(session, name, policy_arn).await?;
    debug!(account_id = %session.account_id, role = %name, policy_arn, "Attached managed policy");
    Ok(())
}

/// Detaching a policy that is already gone is a no-op.
pub async fn detach_policy(
    iam: &dyn IamBackend,
    session: &Session,
    name: &str,
    policy_arn: &str,
) -> Result<()> {
    match iam.detach_role_policy(session, name, policy_arn).await {
        Ok(()) => {
            info!(
                account_id = %session.account_id,
                role = %name,
                policy_arn,
                "Detached managed policy"
            );
            Ok(())
        }
        Err(BackendError::NoSuchEntity(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create the GitHub Actions OIDC provider in the session's account unless it exists.
pub async fn ensure_github_actions_provider(
    iam: &dyn IamBackend,
    session: &Session,
    config: &EngineConfig,
) -> Result<String> {
    let client_ids = [STS_AUDIENCE.to_string()];
    let thumbprints = [GITHUB_ACTIONS_THUMBPRINT.to_string()];
    match iam
        .create_open_id_connect_provider(
            session,
            &config.github_oidc_url,
            &client_ids,
            &thumbprints,
        )
        .await
    {
        Ok(arn) => {
            info!(
                account_id = %session.account_id,
                arn = %arn,
                "Created GitHub Actions OIDC provider"
            );
            Ok(arn)
        }
        Err(BackendError::AlreadyExists(_)) => Ok(oidc_provider_arn(
            &session.account_id,
            config.github_oidc_host(),
        )),
        Err(e) => Err(e.into()),
    }
}
