//! Moa - cross-posting between Mastodon, Twitter and Instagram
//!
//! This library provides the sync core: the message model and its content
//! normalization, the posters for each destination, attachment transfer,
//! the mapping store used for reply threading, the host circuit breaker and
//! the worker that ties them together for one shard of bridges.

pub mod attachments;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod logging;
pub mod message;
pub mod platforms;
pub mod poster;
pub mod retry;
pub mod settings;
pub mod splitter;
pub mod stats;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Config;
pub use db::Database;
pub use error::{MoaError, Result};
pub use message::{Item, Message};
pub use poster::{DestinationProfile, Poster};
pub use settings::Settings;
pub use types::{Mapping, Network, Visibility};
pub use worker::Worker;
