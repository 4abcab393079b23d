//! Stratum CLI - Command-line interface for Stratum schema migrations.
//!
//! This crate provides the `stratum` binary: authoring revisions, moving a
//! database between them and inspecting the revision graph.

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
