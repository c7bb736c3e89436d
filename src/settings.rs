//! Typed settings for the MISP integration.
//!
//! Mirrors the `misp.yaml` layout exactly: a connection block shared by the
//! processing and reporting sides, pre/post processing limits, and the event
//! attributes the reporter publishes. Everything is loaded once at startup
//! and treated as immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigurationError;

/// Root configuration structure mirroring misp.yaml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MispConfig {
    /// MISP server connection settings shared by all integration stages
    pub connection: ConnectionConfig,

    /// Pre- and post-analysis processing settings
    pub processing: ProcessingConfig,

    /// Event reporting settings
    pub reporting: ReportingConfig,
}

/// MISP server connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Whether the MISP integration is enabled at all
    pub enabled: bool,
    /// Base URL of the MISP server API
    pub url: String,
    /// Verify the TLS certificate of the MISP server
    pub verify_tls: bool,
    /// API key used to authenticate against the MISP server
    pub key: String,
    /// Timeout in seconds for MISP API requests
    pub timeout: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            verify_tls: true,
            key: String::new(),
            timeout: 5,
        }
    }
}

/// Processing-stage settings, split by analysis phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Settings for intelligence queries made before an analysis starts
    pub pre: PreProcessingConfig,
    /// Settings for indicator queries made after an analysis completes
    pub post: PostProcessingConfig,
}

/// Pre-analysis intelligence query settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreProcessingConfig {
    /// Maximum number of MISP events to retrieve per queried hash
    pub event_limit: u32,
    /// Hash algorithms used when querying MISP for a submitted sample
    pub hashes: Vec<HashAlgorithm>,
}

impl Default for PreProcessingConfig {
    fn default() -> Self {
        Self {
            event_limit: 1,
            hashes: vec![HashAlgorithm::Sha256],
        }
    }
}

/// Post-analysis indicator query settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessingConfig {
    /// Maximum number of indicators queried per indicator kind
    pub query_limits: IndicatorLimits,
    /// Maximum number of MISP events retrieved per queried indicator
    pub event_limits: IndicatorLimits,
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            query_limits: IndicatorLimits {
                dst_ip: 100,
                domain: 100,
                url: 100,
            },
            event_limits: IndicatorLimits {
                dst_ip: 1,
                domain: 1,
                url: 1,
            },
        }
    }
}

/// Per-indicator-kind limits for post-analysis queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorLimits {
    /// Contacted destination IP addresses
    pub dst_ip: u32,
    /// Contacted domains
    pub domain: u32,
    /// Requested URLs
    pub url: u32,
}

impl IndicatorLimits {
    fn validate(&self, group: &str) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("dst_ip", self.dst_ip),
            ("domain", self.domain),
            ("url", self.url),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("processing.post.{group}.{field}"),
                    "0",
                    "limit must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

/// Hash algorithms accepted for sample lookups on the MISP server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{name}")
    }
}

/// Event reporting settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Whether finished analyses are reported to the MISP server
    pub enabled: bool,
    /// Minimum analysis score (0-10) an analysis must reach to be reported
    pub min_score: u32,
    /// Base URL of the analysis platform web interface, used to link MISP
    /// events back to the originating analysis
    pub web_baseurl: Option<String>,
    /// Attributes of the MISP event created for a reported analysis
    pub event: EventConfig,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_score: 7,
            web_baseurl: None,
            event: EventConfig::default(),
        }
    }
}

/// Attributes of a published MISP event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// MISP distribution level (0-4) controlling event visibility
    pub distribution: u8,
    /// Sharing group identifier, required when distribution is 4
    pub sharing_group: Option<u32>,
    /// MISP threat level (1 high, 2 medium, 3 low, 4 undefined)
    pub threat_level: u8,
    /// MISP analysis stage (0 initial, 1 ongoing, 2 completed)
    pub analysis: u8,
    /// Galaxy tags linking the event to known adversary techniques
    pub galaxy_tags: Vec<String>,
    /// Free-form tags attached to the event
    pub tags: Vec<String>,
    /// Publish the event immediately after creation
    pub publish: bool,
    /// Which indicator kinds become attributes of the event
    pub attributes: AttributesConfig,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            distribution: 0,
            sharing_group: None,
            threat_level: 2,
            analysis: 2,
            galaxy_tags: Vec::new(),
            tags: Vec::new(),
            publish: false,
            attributes: AttributesConfig::default(),
        }
    }
}

/// Per-indicator-kind attribute inclusion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttributesConfig {
    /// Contacted destination IP addresses
    pub ip_addresses: AttributeFlags,
    /// Contacted domains
    pub domains: AttributeFlags,
    /// Requested URLs
    pub urls: AttributeFlags,
    /// Mutexes created by the sample
    pub mutexes: AttributeFlags,
    /// Hashes of the analyzed sample. A nested group, never a scalar.
    pub sample_hashes: SampleHashConfig,
}

/// Inclusion flags for one attribute kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeFlags {
    /// Add attributes of this kind to the event
    pub include: bool,
    /// Mark attributes of this kind as actionable IDS indicators
    pub ids: bool,
}

impl Default for AttributeFlags {
    fn default() -> Self {
        Self {
            include: true,
            ids: false,
        }
    }
}

/// Inclusion flags for sample hash attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleHashConfig {
    /// Add the sample hashes to the event
    pub include: bool,
    /// Mark the sample hashes as actionable IDS indicators
    pub ids: bool,
    /// Upload the sample file itself alongside its hashes
    pub upload_sample: bool,
}

impl Default for SampleHashConfig {
    fn default() -> Self {
        Self {
            include: true,
            ids: false,
            upload_sample: false,
        }
    }
}

impl MispConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        // Connection validation. URL and key are only required once the
        // integration is actually switched on, so that a fully-defaulted
        // (disabled) document remains loadable.
        if self.connection.enabled {
            if self.connection.url.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "connection.url",
                    "connection configuration",
                ));
            }

            if self.connection.key.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "connection.key",
                    "connection configuration",
                ));
            }

            if self.connection.timeout == 0 {
                return Err(ConfigurationError::invalid_value(
                    "connection.timeout",
                    "0",
                    "request timeout must be greater than 0 seconds",
                ));
            }

            if self.processing.pre.hashes.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "processing.pre.hashes",
                    "at least one hash algorithm must be configured",
                ));
            }
        }

        let mut seen = HashSet::new();
        for hash in &self.processing.pre.hashes {
            if !seen.insert(hash) {
                return Err(ConfigurationError::invalid_value(
                    "processing.pre.hashes",
                    hash.to_string(),
                    "hash algorithms must be unique",
                ));
            }
        }

        if self.processing.pre.event_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "processing.pre.event_limit",
                "0",
                "event limit must be greater than 0",
            ));
        }

        self.processing.post.query_limits.validate("query_limits")?;
        self.processing.post.event_limits.validate("event_limits")?;

        // Reporting validation
        if self.reporting.min_score > 10 {
            return Err(ConfigurationError::invalid_value(
                "reporting.min_score",
                self.reporting.min_score.to_string(),
                "minimum score must be between 0 and 10",
            ));
        }

        let event = &self.reporting.event;

        if event.distribution > 4 {
            return Err(ConfigurationError::invalid_value(
                "reporting.event.distribution",
                event.distribution.to_string(),
                "distribution must be between 0 (organisation only) and 4 (sharing group)",
            ));
        }

        if event.distribution == 4 {
            match event.sharing_group {
                None => {
                    return Err(ConfigurationError::missing_required_field(
                        "reporting.event.sharing_group",
                        "sharing group distribution requires a sharing group identifier",
                    ));
                }
                Some(0) => {
                    return Err(ConfigurationError::invalid_value(
                        "reporting.event.sharing_group",
                        "0",
                        "sharing group identifier must be greater than 0",
                    ));
                }
                Some(_) => {}
            }
        }

        if !(1..=4).contains(&event.threat_level) {
            return Err(ConfigurationError::invalid_value(
                "reporting.event.threat_level",
                event.threat_level.to_string(),
                "threat level must be between 1 (high) and 4 (undefined)",
            ));
        }

        if event.analysis > 2 {
            return Err(ConfigurationError::invalid_value(
                "reporting.event.analysis",
                event.analysis.to_string(),
                "analysis stage must be between 0 (initial) and 2 (completed)",
            ));
        }

        Ok(())
    }

    /// Get the MISP request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout)
    }

    /// Check whether any MISP interaction is enabled
    pub fn is_enabled(&self) -> bool {
        self.connection.enabled
    }

    /// Check whether finished analyses should be reported
    pub fn reporting_enabled(&self) -> bool {
        self.connection.enabled && self.reporting.enabled
    }
}
