pub mod archive;
pub mod cache;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod download;
pub mod error;
pub mod http;
pub mod index;
pub mod installer;
pub mod instance;
pub mod package;
pub mod paths;
pub mod relationship;
pub mod resolver;
pub mod runtime;
pub mod transaction;
pub mod user;
pub mod version;
