//! # sshtm
//!
//! Command line front end for `sshtm-core`.

pub mod cli;
