//! Placetrack - buffered place-interaction tracker
//!
//! Records click, like and bookmark interactions with places, buffers them in
//! memory and ships them in batches to a collection endpoint, retrying failed
//! batches on the next flush.
//!
//! # Architecture
//! - `analytics`: records, builders, the tracker core, sinks and the tracker context
//! - `identity`: current-user resolution from explicit ids and stored credentials
//! - `config`: configuration loading (TOML + environment)
//! - `runtime`: host lifecycle (flush on shutdown)
//! - `system`: logging setup

pub mod analytics;
pub mod config;
pub mod errors;
pub mod identity;
pub mod runtime;
pub mod system;
