//! # Workload Launcher library
//!
//! Core functionality for the workload launcher: a supervisor that drives a
//! population of managed processes through their lifecycle, and the network
//! facade that lets a central controller assign, revoke and inspect those
//! processes at runtime. The binaries generated by this project consume this
//! library.

pub mod context;
pub mod controller;
pub mod event;
pub mod isolation;
pub mod launcher;
pub mod supervisor;
pub mod syncer;
pub mod utils;
