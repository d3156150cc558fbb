//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IBackend`] - One side of a reconciliation pair (local tree, remote store)
//! - [`IContentHasher`] - Optional content hashing capability of a backend
//! - [`IServerSideCopy`] - Optional copy-without-streaming capability

pub mod backend;

pub use backend::{
    BackendIdentity, ByteStream, IBackend, IContentHasher, IServerSideCopy, ModTimePrecision,
    RemoteEntry,
};
