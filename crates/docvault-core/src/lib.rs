//! Document vault core: encryption at rest, integrity hashing and signing of
//! uploaded documents, with verified recovery on download.
//!
//! Keys are loaded once into [`keys::KeyMaterial`] and passed explicitly; the
//! [`pipeline::DocumentProtectionPipeline`] holds no other state.

pub mod audit;
pub mod cipher;
pub mod config;
pub mod digest;
pub mod error;
pub mod event_log;
pub mod key_wrap;
pub mod keys;
pub mod paths;
pub mod pipeline;
pub mod record;
pub mod service;
pub mod signature;
pub mod store;

pub use error::{ConfigError, KeyRole, Result, VaultError};
