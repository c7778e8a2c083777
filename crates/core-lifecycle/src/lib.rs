//! Lifecycle of the long-running content-delivery client: start/stop/restart
//! control and periodic state sampling.

pub mod child;
pub mod config;
pub mod error;
pub mod poller;
pub mod service;
pub mod state;

pub use child::ChildProcessService;
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use poller::{spawn_state_poller, ChannelObserver, PollerConfig, PollerHandle, StateObserver};
pub use service::{BackgroundService, ServiceController};
pub use state::BackgroundState;
