//! Core types, config, errors, and conversation model for Parley.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
