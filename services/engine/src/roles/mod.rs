//! Role Reconciler
//!
//! Idempotent convergence of roles, trust policies and inline or attached
//! policies, reached through a per-account role-assumption hop.

pub mod backend;
mod client;
mod create;
mod ensure;
mod managed;
mod sweep;

pub use backend::{Credentials, IamBackend, Role, Session, SessionProvider};
pub use client::{AccountClient, ClientFactory, RoleCapabilities};
pub use create::{
    create_role, github_actions_statement, humans_statement, CreateRoleReport, CreateRoleRequest,
};
pub use ensure::{
    attach_policy, detach_policy, ensure_github_actions_provider, ensure_role,
    ensure_role_with_policy,
};
pub use managed::{ManagedAssumeRolePolicy, ManagedPolicyAttachments};
pub use sweep::{sweep, terraform_principals, SweepReport, UnreconciledAccount};
