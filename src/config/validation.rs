//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sniff cap > 0, watermarks ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError {
            field: "listener.bind_address",
            message: "must not be empty".to_string(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError {
            field: "listener.max_connections",
            message: "must be greater than zero".to_string(),
        });
    }
    if config.sniff.max_bytes == 0 {
        errors.push(ValidationError {
            field: "sniff.max_bytes",
            message: "must be greater than zero".to_string(),
        });
    }
    if config.socket.write_buffer_low > config.socket.write_buffer_high {
        errors.push(ValidationError {
            field: "socket.write_buffer_low",
            message: format!(
                "low watermark ({}) must not exceed high watermark ({})",
                config.socket.write_buffer_low, config.socket.write_buffer_high
            ),
        });
    }
    if config.socket.write_spin_count == 0 {
        errors.push(ValidationError {
            field: "socket.write_spin_count",
            message: "must be greater than zero".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_inverted_watermarks_are_rejected() {
        let mut config = ServerConfig::default();
        config.socket.write_buffer_low = 64 * 1024;
        config.socket.write_buffer_high = 16 * 1024;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "socket.write_buffer_low"));
    }

    #[test]
    fn test_all_errors_are_collected() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = String::new();
        config.sniff.max_bytes = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
