// Library root: re-exports all modules so integration tests and the hub
// binary can access the crate's public API.

pub mod app;
pub mod config;
pub mod db;
pub mod game;
pub mod hub;
pub mod protocol;
pub mod sync;
