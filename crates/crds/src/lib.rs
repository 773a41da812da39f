//! netbox-ip-controller CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the netbox-ip-controller.

pub mod netbox_ip;

pub use netbox_ip::*;
