//! Stochastic SIRS epidemics with deaths on configuration-model contact networks.
//!
//! [`engine::simulate`] generates a network from a [`config::Config`] and runs
//! a continuous-time simulation on it, returning the event trace and summary
//! statistics of the run. [`manager::Manager`] drives ensembles of runs inside
//! a simulation directory.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod graph;
pub mod manager;
pub mod model;
pub mod stats;
