pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod memory;
pub mod models;
pub mod poller;
pub mod resolver;
pub mod routes;
pub mod store;
