//! Ludora - educational content marketplace backend
//!
//! Core crate for the Ludora platform: catalog, purchases, subscription
//! allowances, and the access-control layer that arbitrates between them.
//! All modules are public so integration tests can drive them directly.

pub mod access;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod seed;
pub mod session;
pub mod settings;
pub mod storage;
pub mod tokens;
pub mod web;
