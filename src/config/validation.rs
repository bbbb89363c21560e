//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0 where required, sane heap sizes)
//! - Check route patterns are well-formed before table compilation
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn error(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.protocol != "http" {
        errors.push(error(
            "listener.protocol",
            format!("unsupported protocol '{}'", config.listener.protocol),
        ));
    }
    if config.listener.max_servers == 0 {
        errors.push(error("listener.max_servers", "must be at least 1"));
    }

    if config.workers.root.is_empty() {
        errors.push(error("workers.root", "must not be empty"));
    }
    if config.workers.default_worker.is_empty() {
        errors.push(error("workers.default_worker", "must not be empty"));
    }

    let limits = &config.workers.limits;
    if limits.max_request_time_ms == 0 {
        errors.push(error("workers.limits.max_request_time_ms", "must be > 0"));
    }
    if limits.cpu_budget_ms == 0 {
        errors.push(error("workers.limits.cpu_budget_ms", "must be > 0"));
    }
    if limits.max_old_heap_mb == 0 || limits.max_young_heap_mb == 0 {
        errors.push(error("workers.limits", "heap sizes must be > 0"));
    }
    if limits.stack_size_mb == 0 {
        errors.push(error("workers.limits.stack_size_mb", "must be > 0"));
    }

    // "*" alone is a valid table: route everything to its own path.
    if !config.routes.is_null() && !config.routes.is_object() && !config.routes.is_string() {
        errors.push(error("routes", "must be a table of route patterns or \"*\""));
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
    fn test_all_errors_reported() {
        let mut config = ServerConfig::default();
        config.listener.max_servers = 0;
        config.workers.root = String::new();
        config.workers.limits.cpu_budget_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "listener.max_servers"));
    }

    #[test]
    fn test_routes_must_be_table_or_wildcard() {
        let mut config = ServerConfig::default();
        config.routes = serde_json::json!("*");
        assert!(validate_config(&config).is_ok());

        config.routes = serde_json::json!(42);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "routes");
    }
}
