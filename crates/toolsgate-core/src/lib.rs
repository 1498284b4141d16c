//! Guest-tools readiness gate for freshly built VMware virtual machines.
//!
//! The post-process step takes a build artifact, finds the VM it describes on
//! a vSphere endpoint, boots it when needed until VMware Tools registers, and
//! hands back a vSphere artifact reference.

pub mod artifact;
pub mod backend;
pub mod cancel;
pub mod config;
pub mod error;
pub mod poller;
pub mod processor;
pub mod scripted;

pub use artifact::*;
pub use backend::*;
pub use cancel::*;
pub use config::*;
pub use error::*;
pub use poller::*;
pub use processor::*;
