//! Flexpath: energy-budget-aware path control for software-defined networks.
//!
//! The [`controller::Controller`] reacts to the first packet of every flow by computing a path
//! with a generalized Dijkstra ([`algorithms::shortest_path`]) over a pluggable
//! [`weight::Weight`], and by installing forwarding rules along it. Periodically, the
//! [`balancer`] replaces the segments of installed paths that cross a switch whose energy
//! consumption exceeds its forecast budget ([`energy`], [`forecast`]).

#![deny(missing_docs, missing_debug_implementations)]
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]

pub mod algorithms;
pub mod balancer;
pub mod config;
pub mod controller;
pub mod energy;
pub mod error;
pub mod event;
pub mod flow;
pub mod forecast;
pub mod rules;
pub mod state;
pub mod telemetry;
#[cfg(test)]
mod tests;
pub mod weight;

pub use error::Error;
