pub mod adapters;
pub mod channel;
pub mod config;
pub mod definitions;
pub mod dispatcher;
pub mod event_log;
mod hub;
pub mod protocol;
pub mod service;
pub mod statistics;
pub mod usb;

pub use hub::{run_robothub, RobotHubHandle, StartupError};
