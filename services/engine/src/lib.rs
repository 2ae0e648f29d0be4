//! OrgTrust Engine Library
//!
//! Identity and trust reconciliation across a multi-account cloud
//! organization: account selection, canned principals, idempotent role
//! convergence and collation of live role state back into intent.

pub mod accounts;
pub mod collator;
pub mod config;
pub mod error;
pub mod memory;
pub mod naming;
pub mod policies;
pub mod principals;
pub mod quotas;
pub mod roles;
pub mod tagging;

pub use accounts::{Account, AccountCatalog, Selection, Selector, Selectors};
pub use collator::{collate, CollatedRole, CollationReport};
pub use config::EngineConfig;
pub use error::{BackendError, OrgError, Result};
pub use memory::InMemoryOrganization;
pub use principals::{CannedPolicies, CannedPrincipals};
pub use quotas::{ensure_service_quota, ensure_service_quota_in_all_regions, QuotaRequest};
pub use roles::{create_role, sweep, ClientFactory, CreateRoleRequest, SweepReport};
