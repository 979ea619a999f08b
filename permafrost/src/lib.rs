//! Relocatable snapshot archives of live object graphs.
//!
//! An archive holds copies of every object reachable from a set of roots,
//! laid out so that it can be mapped at a fixed requested address
//! and used right away. See [`builder`] for the build pipeline,
//! and [`host`] for what the runtime being archived must provide.

#![warn(missing_docs)]

pub mod address;
pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod estimate;
pub mod heap;
pub mod host;
pub mod ledger;
pub mod object;
pub mod region;
pub mod registry;
pub mod stats;
