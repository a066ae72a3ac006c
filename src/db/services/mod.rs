//! The `services` module is the high-level API over the entity store. It
//! encapsulates all query and transaction logic so the daemon, sweep, and
//! the external API layer work with domain models without touching the
//! underlying schema.
//!
//! Layering: the CRUD services and the ingestion/status engine sit directly
//! on the entities; `usage_stats_service` reads the ledgers both of them
//! write. Nothing here imports the daemon wiring.

pub mod admin_service;
pub mod error;
pub mod node_service;
pub mod service_service;
pub mod usage_service;
pub mod usage_stats_service;
pub mod user_service;
pub mod user_status_service;

pub use admin_service::*;
pub use error::ServiceError;
pub use node_service::*;
pub use service_service::*;
pub use usage_service::*;
pub use usage_stats_service::*;
pub use user_service::*;
pub use user_status_service::*;
