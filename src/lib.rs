//! # Chargelink
//!
//! Real-time notification and charging-session core of an EV-charging
//! management backend. Connected clients are tracked in a process-wide pool,
//! commands spawn cancellable polling watchers over a transaction repository,
//! and a session store lets clients resume in-flight operations after
//! reconnecting.
//!
//! ## Architecture
//!
//! - **domain**: entities, errors and the collaborator traits (repositories,
//!   authenticator, business-command gateway)
//! - **notifications**: the client pool actor and the log broadcaster
//! - **session**: session store and watcher state machines
//! - **interfaces**: the WebSocket endpoint and wire protocol
//! - **infrastructure**: in-memory collaborator implementations
//! - **shared**: shutdown/cancellation signalling

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod notifications;
pub mod session;
pub mod shared;

pub use config::{default_config_path, AppConfig};
pub use interfaces::ws::{notification_router, ClientDeps, UserRequest, WsResponse};
pub use notifications::{Broadcaster, ClientPool, PoolHandle};
pub use session::{SessionStore, WatcherConfig};
pub use shared::ShutdownSignal;
