use anyhow::{Result, anyhow};
use std::net::IpAddr;
use url::Url;

use crate::database::models::{Service, Webhook};
use crate::monitoring::types::CheckKind;

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn to_result(&self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(anyhow!(self.error.clone().unwrap_or_else(|| "Validation failed".to_string())))
        }
    }

    fn and_then(self, next: impl FnOnce() -> ValidationResult) -> ValidationResult {
        if self.is_valid { next() } else { self }
    }
}

/// Validate HTTP/HTTPS URL endpoint
pub fn validate_http_endpoint(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("Target cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate a host given as IP address or hostname
pub fn validate_host(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("Host cannot be empty");
    }

    if target.parse::<IpAddr>().is_ok() {
        return ValidationResult::ok();
    }

    if target.contains(' ') {
        return ValidationResult::err("Host cannot contain spaces");
    }

    if target.starts_with('-') || target.ends_with('-') {
        return ValidationResult::err("Hostname cannot start or end with hyphen");
    }

    if target.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '-') {
        ValidationResult::ok()
    } else {
        ValidationResult::err("Invalid host. Use IP address or valid hostname")
    }
}

/// Validate service name
pub fn validate_name(name: &str) -> ValidationResult {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return ValidationResult::err("Name cannot be empty");
    }

    if trimmed.len() > 100 {
        return ValidationResult::err("Name too long (max 100 characters)");
    }

    ValidationResult::ok()
}

/// Validate check interval
pub fn validate_interval(interval: u64) -> ValidationResult {
    if interval == 0 {
        return ValidationResult::err("Interval must be at least 1 second");
    }

    if interval > 86400 {
        return ValidationResult::err("Interval too long (max 24 hours)");
    }

    ValidationResult::ok()
}

/// Kind-specific requirements on top of the common fields
fn validate_check_settings(service: &Service) -> ValidationResult {
    match service.check_type {
        CheckKind::Http => match service.check_target.as_deref() {
            Some(target) if target.starts_with('/') => ValidationResult::ok(),
            Some(target) if !target.trim().is_empty() => validate_http_endpoint(target),
            _ => ValidationResult::ok(),
        },
        CheckKind::Script => match service.script_content.as_deref() {
            Some(script) if !script.trim().is_empty() => ValidationResult::ok(),
            _ => ValidationResult::err("Script checks need script content"),
        },
        CheckKind::Snmp if service.snmp_community.trim().is_empty() => {
            ValidationResult::err("SNMP checks need a community string")
        }
        CheckKind::Tcp | CheckKind::Icmp | CheckKind::Snmp => ValidationResult::ok(),
    }
}

/// Validate a service before it is persisted
pub fn validate_service(service: &Service) -> ValidationResult {
    validate_name(&service.name)
        .and_then(|| validate_host(&service.ip))
        .and_then(|| validate_interval(service.check_interval))
        .and_then(|| match service.port {
            Some(0) => ValidationResult::err("Port must be between 1 and 65535"),
            _ => ValidationResult::ok(),
        })
        .and_then(|| validate_check_settings(service))
        .and_then(|| {
            if service.auto_restart
                && service.restart_command.as_deref().is_none_or(|c| c.trim().is_empty())
            {
                ValidationResult::err("Auto restart needs a restart command")
            } else {
                ValidationResult::ok()
            }
        })
}

/// Validate a webhook subscription
pub fn validate_webhook(webhook: &Webhook) -> ValidationResult {
    validate_name(&webhook.name).and_then(|| validate_http_endpoint(&webhook.url)).and_then(|| {
        if webhook.events.is_empty() {
            ValidationResult::err("Webhook must subscribe to at least one event")
        } else {
            ValidationResult::ok()
        }
    })
}
