//! Test utilities for etcdstress.
//!
//! This crate provides utilities to facilitate testing the population engine and the etcd client.
//! See the modules for all available utilities.

pub mod server;
pub mod stores;
pub mod tracing;
