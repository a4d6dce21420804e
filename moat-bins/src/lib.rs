//! Shared code for the moat operator binaries

pub mod common;
