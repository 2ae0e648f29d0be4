//! Organization accounts
//!
//! - `types`: accounts, their types and the organization descriptor
//! - `catalog`: the external account listing and account grouping
//! - `selectors`: the persisted selector-token vocabulary
//! - `selection`: matching and partitioning accounts against a `Selection`

mod catalog;
mod selection;
mod selectors;
mod types;

pub use catalog::{require_special_account, AccountCatalog, GroupedAccounts};
pub use selection::{Partition, Selection};
pub use selectors::{DecodedSelectors, Selector, Selectors};
pub use types::{Account, AccountType, AccountWithSelectors, Organization, SpecialAccount};
