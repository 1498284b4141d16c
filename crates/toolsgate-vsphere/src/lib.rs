//! vSphere (`vim25` SOAP) implementation of the hypervisor traits.

pub mod client;
pub mod soap;

pub use client::{VsphereConnector, VsphereSession};
