#![deny(warnings)]
//! End-to-end integration tests across the SLS engine crates.
