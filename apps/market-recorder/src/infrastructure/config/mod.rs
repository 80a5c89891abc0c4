//! Configuration Module
//!
//! Configuration loading for the recorder.

mod settings;

pub use settings::{ConfigError, FeedSettings, RecorderConfig, ServerSettings, StorageSettings};
