//! Configuration Loader
//!
//! Environment-aware loading of the `misp.yaml` settings document. Handles
//! file discovery, environment detection, `${ENV_VAR}` interpolation, and
//! merging of environment-specific overlay sections before the document is
//! deserialized and validated.

use regex::Regex;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ConfigResult, ConfigurationError};
use crate::settings::MispConfig;

/// Names of the environment overlay sections recognised in misp.yaml
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Loads and holds the validated MISP integration settings
#[derive(Debug)]
pub struct ConfigManager {
    config: MispConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading MISP configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config_file = Self::find_config_file(&config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;
        let config = Self::parse_and_merge(
            &yaml_content,
            &config_file.display().to_string(),
            environment,
        )?;

        config.validate()?;

        debug!(
            "MISP configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment,
            enabled = config.connection.enabled,
            reporting = config.reporting.enabled,
            "MISP configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load configuration from a YAML string with explicit environment
    pub fn load_from_yaml(yaml_content: &str, environment: &str) -> ConfigResult<ConfigManager> {
        let config = Self::parse_and_merge(yaml_content, "yaml_string", environment)?;
        config.validate()?;

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("conf"),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &MispConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Get sanitized configuration for debugging/logging that masks the API
    /// key and other secret-looking fields
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        env::var("MISP_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Get default configuration directory
    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var("MISP_CONFIG_DIR") {
            return PathBuf::from(dir);
        }

        for dir in [PathBuf::from("conf"), PathBuf::from("config")] {
            if dir.join("misp.yaml").exists() || dir.join("misp.yml").exists() {
                debug!("Found config directory: {}", dir.display());
                return dir;
            }
        }

        PathBuf::from("conf")
    }

    /// Find the configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let possible_names = ["misp.yaml", "misp.yml"];
        let mut searched_paths = Vec::new();

        for name in possible_names {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Safely read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024; // 1MB limit

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                "configuration file exceeds 1MB limit",
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file".to_string(),
                "configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Interpolate, parse, and merge a YAML document into a configuration
    fn parse_and_merge(
        yaml_content: &str,
        source: &str,
        environment: &str,
    ) -> ConfigResult<MispConfig> {
        let interpolated_content = Self::interpolate_env_vars(yaml_content);

        let mut yaml_data: YamlValue = serde_yaml::from_str(&interpolated_content)
            .map_err(|e| ConfigurationError::invalid_yaml(source, e))?;

        // Apply environment-specific overrides
        if let Some(env_overrides) = yaml_data.get(environment).cloned() {
            debug!(
                "Applying environment-specific overrides for: {}",
                environment
            );
            Self::merge_yaml_values(&mut yaml_data, env_overrides)?;
        }

        // Remove environment sections to avoid them being seen as settings
        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(section);
            }
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                source,
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value)?;
                    } else {
                        base_map.insert(key, value);
                    }
                }
                Ok(())
            }
            (YamlValue::Mapping(_), override_val) => Err(ConfigurationError::config_merge_error(
                format!("environment overlay must be a mapping, got: {override_val:?}"),
            )),
            (base_ref, override_val) => {
                // For scalar and sequence values, override completely
                *base_ref = override_val;
                Ok(())
            }
        }
    }

    /// Interpolate environment variables in configuration strings
    fn interpolate_env_vars(template: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
        re.replace_all(template, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| format!("${{{var_name}}}"))
        })
        .to_string()
    }

    /// Sanitize configuration for safe logging by masking secret-looking fields
    fn sanitize_config_for_logging(config: &MispConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["key", "password", "secret", "token", "credential"];

        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);

        config_json
    }

    /// Recursively mask sensitive fields in the JSON configuration view
    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();

                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        if let serde_json::Value::String(s) = val {
                            if s.is_empty() {
                                *val = serde_json::Value::String("[EMPTY]".to_string());
                            } else {
                                // Show only first 2 and last 2 characters for debugging.
                                // Sliced per char, not per byte: keys are not
                                // guaranteed to be ASCII.
                                let chars: Vec<char> = s.chars().collect();
                                let masked = if chars.len() > 4 {
                                    let head: String = chars[..2].iter().collect();
                                    let tail: String = chars[chars.len() - 2..].iter().collect();
                                    format!("{head}***{tail}")
                                } else {
                                    "***".to_string()
                                };
                                *val = serde_json::Value::String(format!("[MASKED: {masked}]"));
                            }
                        } else if !val.is_boolean() {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::HashAlgorithm;

    fn minimal_enabled_yaml() -> &'static str {
        r#"
connection:
  enabled: true
  url: "https://misp.example.tld"
  verify_tls: true
  key: "0123456789abcdef"
  timeout: 10
"#
    }

    #[test]
    fn test_load_minimal_document() {
        let manager = ConfigManager::load_from_yaml(minimal_enabled_yaml(), "production").unwrap();
        let config = manager.config();

        assert!(config.connection.enabled);
        assert_eq!(config.connection.url, "https://misp.example.tld");
        assert_eq!(config.connection.timeout, 10);
        // Absent sections fall back to defaults
        assert_eq!(config.processing.pre.event_limit, 1);
        assert_eq!(config.processing.pre.hashes, vec![HashAlgorithm::Sha256]);
        assert!(!config.reporting.enabled);
    }

    #[test]
    fn test_environment_variable_interpolation() {
        env::set_var("MISP_TEST_API_KEY", "deadbeef");
        let result = ConfigManager::interpolate_env_vars("key: ${MISP_TEST_API_KEY}");
        assert_eq!(result, "key: deadbeef");
        env::remove_var("MISP_TEST_API_KEY");
    }

    #[test]
    fn test_unset_environment_variable_kept_verbatim() {
        let result = ConfigManager::interpolate_env_vars("key: ${MISP_UNSET_VAR_XYZ}");
        assert_eq!(result, "key: ${MISP_UNSET_VAR_XYZ}");
    }

    #[test]
    fn test_environment_overlay_applied() {
        let yaml = r#"
connection:
  enabled: true
  url: "https://misp.example.tld"
  key: "0123456789abcdef"
reporting:
  min_score: 7

test:
  reporting:
    min_score: 9
"#;

        let base = ConfigManager::load_from_yaml(yaml, "production").unwrap();
        assert_eq!(base.config().reporting.min_score, 7);

        let overlaid = ConfigManager::load_from_yaml(yaml, "test").unwrap();
        assert_eq!(overlaid.config().reporting.min_score, 9);
        // The overlay only touches what it names
        assert_eq!(overlaid.config().connection.url, "https://misp.example.tld");
    }

    #[test]
    fn test_non_mapping_overlay_rejected() {
        let yaml = r#"
connection:
  enabled: false

test: true
"#;

        let error = ConfigManager::load_from_yaml(yaml, "test").unwrap_err();
        assert!(matches!(
            error,
            ConfigurationError::ConfigMergeError { .. }
        ));
    }

    #[test]
    fn test_unknown_hash_algorithm_rejected() {
        let yaml = r#"
connection:
  enabled: true
  url: "https://misp.example.tld"
  key: "0123456789abcdef"
processing:
  pre:
    hashes:
    - sha256
    - whirlpool
"#;

        let error = ConfigManager::load_from_yaml(yaml, "production").unwrap_err();
        assert!(matches!(error, ConfigurationError::InvalidYaml { .. }));
    }

    #[test]
    fn test_non_boolean_include_flag_rejected() {
        let yaml = r#"
reporting:
  event:
    attributes:
      domains:
        include: "sometimes"
"#;

        let error = ConfigManager::load_from_yaml(yaml, "production").unwrap_err();
        assert!(matches!(error, ConfigurationError::InvalidYaml { .. }));
    }

    #[test]
    fn test_scalar_sample_hashes_rejected() {
        let yaml = r#"
reporting:
  event:
    attributes:
      sample_hashes: true
"#;

        let error = ConfigManager::load_from_yaml(yaml, "production").unwrap_err();
        assert!(matches!(error, ConfigurationError::InvalidYaml { .. }));
    }

    #[test]
    fn test_validation_failure_is_fatal() {
        let yaml = r#"
connection:
  enabled: true
  key: "0123456789abcdef"
"#;

        let error = ConfigManager::load_from_yaml(yaml, "production").unwrap_err();
        assert!(error.to_string().contains("connection.url"));
    }

    #[test]
    fn test_deterministic_reload() {
        let first = ConfigManager::load_from_yaml(minimal_enabled_yaml(), "production").unwrap();
        let second = ConfigManager::load_from_yaml(minimal_enabled_yaml(), "production").unwrap();

        assert_eq!(first.config(), second.config());
    }

    #[test]
    fn test_empty_tags_round_trip() {
        let yaml = r#"
reporting:
  event:
    tags: []
    galaxy_tags: []
"#;

        let manager = ConfigManager::load_from_yaml(yaml, "production").unwrap();
        assert!(manager.config().reporting.event.tags.is_empty());
        assert!(manager.config().reporting.event.galaxy_tags.is_empty());
    }

    #[test]
    fn test_sanitized_logging_masks_api_key() {
        let manager = ConfigManager::load_from_yaml(minimal_enabled_yaml(), "production").unwrap();
        let debug_view = manager.debug_config();

        let key = debug_view["connection"]["key"].as_str().unwrap();
        assert!(key.starts_with("[MASKED"));
        assert!(!key.contains("0123456789abcdef"));
        // Non-secret fields stay readable
        assert_eq!(
            debug_view["connection"]["url"].as_str().unwrap(),
            "https://misp.example.tld"
        );
    }

    #[test]
    fn test_sanitized_logging_handles_multibyte_api_key() {
        let yaml = r#"
connection:
  enabled: true
  url: "https://misp.example.tld"
  key: "€abcdef0123"
"#;

        let manager = ConfigManager::load_from_yaml(yaml, "production").unwrap();
        let debug_view = manager.debug_config();

        let key = debug_view["connection"]["key"].as_str().unwrap();
        assert!(key.starts_with("[MASKED"));
        assert!(key.contains("€a***23"));
        assert!(!key.contains("€abcdef0123"));
    }

    #[test]
    fn test_sanitized_logging_masks_short_keys_entirely() {
        let yaml = r#"
connection:
  enabled: true
  url: "https://misp.example.tld"
  key: "日本語鍵"
"#;

        let manager = ConfigManager::load_from_yaml(yaml, "production").unwrap();
        let debug_view = manager.debug_config();

        let key = debug_view["connection"]["key"].as_str().unwrap();
        assert_eq!(key, "[MASKED: ***]");
    }

    #[test]
    fn test_tag_order_preserved() {
        let yaml = r#"
reporting:
  event:
    tags:
    - "first"
    - "second"
    - "third"
"#;

        let manager = ConfigManager::load_from_yaml(yaml, "production").unwrap();
        assert_eq!(
            manager.config().reporting.event.tags,
            vec!["first", "second", "third"]
        );
    }
}
