pub mod api;
pub mod auth;
pub mod config;
pub mod cycle;
pub mod db;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod repositories;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;
