//! Ambassador program backend library.
//!
//! Exposes the server as a library so the HTTP surface can be exercised in
//! tests over the in-memory store.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
