//! Turku API server library.
//!
//! Coordinates a backup fleet: machines register the sources they want
//! backed up, storage units register their capacity, and both check in to
//! learn what is due and to report results.

pub mod auth;
pub mod broker;
pub mod routes;
pub mod storage;
