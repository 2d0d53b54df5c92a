//! # portal-client
//!
//! Client library for the PortalSync protocol.
//!
//! One [`ClientEngine`] drives the whole client side: registration, the
//! poll loop, roster reconciliation, and encrypted send/receive. The
//! engine is parameterized by a [`Transport`], so the same protocol code
//! runs against a remote relay over HTTP ([`HttpTransport`]), against an
//! in-process relay ([`LocalTransport`]), or against a scripted
//! [`MockTransport`] in tests.
//!
//! ```text
//! watched outbox folders → ClientEngine → Transport → relay
//!         (portal-watch)        ↓
//!                     inbox folders per sender
//! ```
//!
//! All session state lives in an explicitly constructed [`ClientContext`]
//! owned by the engine; there is no ambient global state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod roster;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use context::ClientContext;
pub use engine::{spawn_poll_loop, ClientEngine};
pub use error::ClientError;
pub use roster::{RosterDiff, RosterEntry, RosterMap};
pub use transport::{HttpTransport, LocalTransport, MockTransport, Transport, TransportError};
