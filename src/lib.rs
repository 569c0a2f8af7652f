//! Library crate for ink-sprint-back, exposing modules for binaries and integration tests.

pub mod config;
pub mod dao;
pub mod engine;
pub mod error;
pub mod services;
pub mod state;
