//! # portal-types
//!
//! Identity and wire format types for the PortalSync exchange protocol.
//!
//! This crate provides the foundational types used across all PortalSync
//! crates:
//! - [`PortalId`], [`ItemId`] - Identity types
//! - [`KvDocument`] - Flat `key=value` wire document (roster, registration, poll)
//! - [`container`] - Two-entry transfer container and folder archive records
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
mod error;
mod ids;
mod kv;

pub use error::WireError;
pub use ids::{ItemId, PortalId};
pub use kv::KvDocument;
