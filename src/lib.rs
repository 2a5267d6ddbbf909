pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod gateway;
pub mod identity;
pub mod server;
pub mod value;
