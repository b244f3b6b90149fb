//! Simbox fraud simulation and detection.
//!
//! A population of simulated phones moves between cells and calls each
//! other while a fraud ring routes international calls through a rack of
//! local SIMs. Everything lands in a SQLite store that groups devices
//! moving in lockstep and scores each device's recent call pattern
//! against a rule set.

pub mod clock;
pub mod cohort;
pub mod config;
pub mod contacts;
pub mod device;
pub mod error;
pub mod event;
pub mod history;
pub mod ledger;
pub mod pending;
pub mod probe;
pub mod records;
pub mod rng;
pub mod rules;
pub mod scorer;
pub mod service;
pub mod simbox;
pub mod simulator;
pub mod store;
pub mod types;
