//! Library crate for recon-harness: diagnostic modules exercising agent
//! platform capabilities, and a phase-sequenced reconnaissance runner that
//! turns tool output into taxonomy graph batches.
pub mod analysis;
pub mod config;
pub mod error;
pub mod execute;
pub mod extract;
pub mod graph;
pub mod harness;
pub mod modules;
pub mod netutil;
pub mod parse;
pub mod recon;
pub mod replay;
pub mod runner;
pub mod server;
pub mod suite;
pub mod types;
