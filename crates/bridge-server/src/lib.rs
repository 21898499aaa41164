//! Webhook ingress, configuration, and process supervision for the
//! approval bridge. The policy decisions themselves live in `bridge-core`;
//! this crate is the HTTP/YAML/process boundary around it.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod github;
pub mod state;
pub mod supervisor;
pub mod webhook;

pub use config::Config;
pub use supervisor::run;
