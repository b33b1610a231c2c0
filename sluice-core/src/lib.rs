//! Sluice Core
//!
//! Core types and synthesis logic for Sluice pipeline stacks.
//!
//! This crate contains:
//! - Domain types: Roles, pipelines, build projects, assets, Glue jobs
//! - Stack assembly and template synthesis
//! - Deployment state and idempotent change sets

pub mod app;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod error;
pub mod stack;

pub use error::{Result, SynthError};
