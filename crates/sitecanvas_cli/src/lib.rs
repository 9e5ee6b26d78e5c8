pub mod api;
pub mod config_loader;
pub mod preview;
pub mod workflow;
