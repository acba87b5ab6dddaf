//! Populates an etcd cluster with generated records to put it under load.
//!
//! The population itself is performed by [`etcdstress_filler`]. This crate binds it to an etcd
//! cluster speaking the v2 keys API and provides the `etcdstress` command line tool with its
//! configuration, logging and error reporting.
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod etcd;
pub mod observability;
pub mod populate;
pub mod purge;
pub mod report;
