//! Core domain types
//!
//! This module contains the declarative building blocks of a stack.
//! Every type here is immutable once the stack is synthesized; redeploying
//! is the only way to change what they describe.

pub mod artifact;
pub mod asset;
pub mod buildspec;
pub mod execution;
pub mod glue;
pub mod iam;
pub mod pipeline;
pub mod project;
pub mod secret;
