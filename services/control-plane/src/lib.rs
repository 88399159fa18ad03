//! caphub control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod allocation;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod principal;
pub mod provisioner;
pub mod state;
