//! Integration tests for bisync-sync
//!
//! Runs complete reconciliations between in-memory and local backends and
//! verifies convergence, safety aborts, conflict handling and recovery.

mod common;

mod test_local;
mod test_normal;
mod test_recovery;
mod test_safety;
