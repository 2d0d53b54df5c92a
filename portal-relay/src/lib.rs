//! # portal-relay
//!
//! Rendezvous relay server for PortalSync.
//!
//! The relay never initiates anything: portals register, poll, upload, and
//! download over HTTP endpoints whose path segments are derived from a
//! shared seed (knowledge of the seed substitutes for authentication).
//!
//! ## Architecture
//!
//! ```text
//! Portal A ──┐                      ┌── Portal B
//!            │   HTTP (derived      │
//!            │    path segments)    │
//!        ┌───┴──────────────────────┴───┐
//!        │         portal-relay         │
//!        │  ┌───────────┐ ┌──────────┐  │
//!        │  │ directory │ │  blob    │  │
//!        │  │ (DashMap) │ │ buckets  │  │
//!        │  └───────────┘ └──────────┘  │
//!        └──────────────────────────────┘
//! ```
//!
//! File payloads stay opaque end to end. Clipboard payloads are the one
//! exception: they are encrypted *to the relay*, decrypted into an
//! in-memory cache, and re-encrypted per recipient on download.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clipboard;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod store;
pub mod sweep;
