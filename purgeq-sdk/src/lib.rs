//! Shared wire types for purgeq.
//!
//! Storage services and operators talk to the purgeq server through the
//! objects defined here. The optional `client` feature adds a typed HTTP
//! client on top of `reqwest`.

pub mod auth;
pub mod objects;

#[cfg(feature = "client")]
pub mod client;
