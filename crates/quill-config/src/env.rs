//! Environment variable loading with type conversion and validation.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Environment loading errors
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Environment variable not found: {var}")]
    NotFound { var: String },

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("Type conversion error for {var}: {reason}")]
    ConversionError { var: String, reason: String },
}

/// Prefixed environment loader with per-variable defaults
pub struct EnvLoader {
    prefix: Option<String>,
    defaults: HashMap<String, String>,
}

impl EnvLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self {
            prefix: None,
            defaults: HashMap::new(),
        }
    }

    /// Set prefix for environment variables (e.g., "QUILL_")
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set default value for a variable
    pub fn default(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(var.into(), value.into());
        self
    }

    /// Get environment variable with prefix
    pub fn get(&self, var: &str) -> Result<String, EnvError> {
        let full_var = self.make_var_name(var);

        env::var(&full_var).or_else(|_| {
            self.defaults
                .get(var)
                .cloned()
                .ok_or_else(|| EnvError::NotFound {
                    var: full_var.clone(),
                })
        })
    }

    /// Get optional environment variable
    pub fn get_optional(&self, var: &str) -> Option<String> {
        let full_var = self.make_var_name(var);
        env::var(&full_var)
            .ok()
            .or_else(|| self.defaults.get(var).cloned())
    }

    /// Get environment variable as unsigned integer
    pub fn get_uint(&self, var: &str) -> Result<u64, EnvError> {
        let value = self.get(var)?;
        value.parse().map_err(|e| EnvError::ConversionError {
            var: self.make_var_name(var),
            reason: format!("Cannot parse as unsigned integer: {e}"),
        })
    }

    /// Get environment variable as usize
    pub fn get_usize(&self, var: &str) -> Result<usize, EnvError> {
        let value = self.get(var)?;
        value.parse().map_err(|e| EnvError::ConversionError {
            var: self.make_var_name(var),
            reason: format!("Cannot parse as size: {e}"),
        })
    }

    /// Get environment variable as duration (supports "30s", "5m", "1h", "500ms")
    pub fn get_duration(&self, var: &str) -> Result<Duration, EnvError> {
        let value = self.get(var)?;
        parse_duration(&value).map_err(|e| EnvError::ConversionError {
            var: self.make_var_name(var),
            reason: format!("Cannot parse as duration: {e}"),
        })
    }

    fn make_var_name(&self, var: &str) -> String {
        if let Some(ref prefix) = self.prefix {
            format!("{}{}", prefix, var.to_uppercase())
        } else {
            var.to_uppercase()
        }
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse duration string (supports "30s", "5m", "1h", "500ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    if s.ends_with("ms") {
        let num = s[..s.len() - 2]
            .parse::<u64>()
            .map_err(|e| format!("Invalid milliseconds: {e}"))?;
        Ok(Duration::from_millis(num))
    } else if s.ends_with('s') {
        let num = s[..s.len() - 1]
            .parse::<u64>()
            .map_err(|e| format!("Invalid seconds: {e}"))?;
        Ok(Duration::from_secs(num))
    } else if s.ends_with('m') {
        let num = s[..s.len() - 1]
            .parse::<u64>()
            .map_err(|e| format!("Invalid minutes: {e}"))?;
        Ok(Duration::from_secs(num * 60))
    } else if s.ends_with('h') {
        let num = s[..s.len() - 1]
            .parse::<u64>()
            .map_err(|e| format!("Invalid hours: {e}"))?;
        Ok(Duration::from_secs(num * 3600))
    } else if let Ok(num) = s.parse::<u64>() {
        // Bare number defaults to seconds
        Ok(Duration::from_secs(num))
    } else {
        Err(format!("Invalid duration format: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_reads_prefixed_vars() {
        env::set_var("QLTEST_VALUE", "123");

        let loader = EnvLoader::new().with_prefix("QLTEST_");
        assert_eq!(loader.get("VALUE").unwrap(), "123");
        assert_eq!(loader.get_uint("VALUE").unwrap(), 123);

        env::remove_var("QLTEST_VALUE");
    }

    #[test]
    fn loader_falls_back_to_defaults() {
        let loader = EnvLoader::new()
            .with_prefix("QLMISSING_")
            .default("timeout", "60");

        assert_eq!(loader.get("timeout").unwrap(), "60");
        assert_eq!(loader.get_uint("timeout").unwrap(), 60);
        assert!(loader.get("absent").is_err());
    }

    #[test]
    fn loader_optional() {
        env::set_var("QLOPT_PRESENT", "value");

        let loader = EnvLoader::new().with_prefix("QLOPT_");
        assert_eq!(loader.get_optional("PRESENT"), Some("value".to_string()));
        assert_eq!(loader.get_optional("MISSING"), None);

        env::remove_var("QLOPT_PRESENT");
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert!(parse_duration("soon").is_err());
    }
}
