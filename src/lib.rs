pub mod core;
pub mod dispatch;
pub mod health;
pub mod hub;

pub use core::config::{BackoffConfig, ConnectionConfig, SessionConfig};
pub use core::errors::IngestError;
pub use core::types::{CloseReason, EntityState, SessionState, StateChange};
pub use dispatch::{DispatchConfig, Dispatcher};
pub use health::{HealthRegistry, HealthSnapshot};
pub use hub::IngestService;
