//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the bind address and the endpoint path shape
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The bind address does not parse as `host:port`.
    InvalidBindAddress(String),
    /// The endpoint path is empty or does not start with `/`.
    InvalidEndpointPath(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBindAddress(addr) => {
                write!(f, "invalid bind address: {}", addr)
            }
            ValidationError::InvalidEndpointPath(path) => {
                write!(f, "invalid endpoint path: {:?} (must start with '/')", path)
            }
        }
    }
}

/// Check a configuration for semantic problems.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if !config.endpoint.path.starts_with('/') {
        errors.push(ValidationError::InvalidEndpointPath(
            config.endpoint.path.clone(),
        ));
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
    fn test_bad_bind_address_rejected() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "not-an-address".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidBindAddress("not-an-address".to_string())]
        );
    }

    #[test]
    fn test_bad_endpoint_path_rejected() {
        let mut config = ServerConfig::default();
        config.endpoint.path = "rpc".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidEndpointPath("rpc".to_string())]
        );
    }

    #[test]
    fn test_all_errors_reported() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = String::new();
        config.endpoint.path = String::new();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
