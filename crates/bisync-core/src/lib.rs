//! Bisync Core - Domain types and ports for bidirectional reconciliation
//!
//! This crate contains the pure core shared by the engine and its adapters:
//! - **Domain types** - `RelPath`, `Listing`, `DeltaSet`, `Queues`, `Side`
//! - **Port definitions** - `IBackend` and its optional capabilities
//! - **Configuration** - YAML config file and the run `Options` derived from it
//!
//! # Architecture
//!
//! Like the rest of the workspace this follows the ports & adapters pattern.
//! The domain module has no I/O. Ports define the trait every storage backend
//! implements; the concrete backends and the reconciliation engine live in
//! `bisync-sync`.

pub mod config;
pub mod domain;
pub mod ports;
