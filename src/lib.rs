#![allow(clippy::doc_markdown)] // Allow technical terms like MISP, YAML in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # MISP Integration Configuration
//!
//! Typed, validated settings for connecting a malware-analysis platform to a
//! MISP threat-intelligence server.
//!
//! ## Overview
//!
//! The integration reads a single `misp.yaml` document at startup and never
//! mutates it afterwards. This crate models that document as a typed record
//! tree, loads it with environment-variable interpolation and per-environment
//! overlays, and validates every field against its declared kind and value
//! set before any consumer sees it. A failed load is fatal: the integration
//! must not run with partial or invalid configuration.
//!
//! The settings cover three concerns:
//!
//! - **Connection**: MISP server URL, API key, TLS verification, timeout
//! - **Processing**: pre-analysis hash lookups and post-analysis indicator
//!   queries, with per-indicator-kind limits
//! - **Reporting**: the MISP event published for a finished analysis, with
//!   distribution, threat level, tagging, and attribute-inclusion flags
//!
//! The HTTP client, query scheduling, and event publication live in the
//! integration module that consumes these settings; this crate deliberately
//! contains no network code.
//!
//! ## Module Organization
//!
//! - [`settings`] - Typed configuration records and validation
//! - [`loader`] - Environment-aware YAML loading
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use misp_config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load conf/misp.yaml (environment auto-detected)
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! if config.is_enabled() {
//!     println!("querying {} with timeout {:?}", config.connection.url, config.timeout());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod settings;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;
pub use settings::{
    AttributeFlags, AttributesConfig, ConnectionConfig, EventConfig, HashAlgorithm,
    IndicatorLimits, MispConfig, PostProcessingConfig, PreProcessingConfig, ProcessingConfig,
    ReportingConfig, SampleHashConfig,
};
