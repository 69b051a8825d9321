//! Nucleus Core
//!
//! Core types shared by the Nucleus task runner and its control-plane client.
//!
//! This crate contains:
//! - Domain types: payloads, task status records, test configuration schemas, results
//! - DTOs: request and response bodies exchanged with the control plane

pub mod domain;
pub mod dto;
