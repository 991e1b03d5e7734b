//! Site data model, lifecycle guard and record store boundary

pub mod lifecycle;
pub mod store;
mod types;


pub use lifecycle::SiteAction;
pub use store::{enabled_config, MemoryStore, SiteStore};
pub use types::{BuildStatus, DeployStatus, HostingConfig, LastAction, ProjectScope, Site};
