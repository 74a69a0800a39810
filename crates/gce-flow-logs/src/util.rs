// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for configuration values.

/// Parses and validates a Pub/Sub resource id (project, topic or subscription).
///
/// A valid id must:
/// - Be 3 to 255 characters long
/// - Start with an ASCII letter
/// - Contain only ASCII alphanumerics, `-`, `_`, `.`, `~`, `+` or `%`
/// - Not start with `goog`
///
/// Whitespace is automatically trimmed from the input.
///
/// # Examples
///
/// ```
/// use gce_flow_logs::util::parse_resource_id;
///
/// assert_eq!(parse_resource_id("flow_logs_eu_west_2"), Ok("flow_logs_eu_west_2".to_string()));
/// assert!(parse_resource_id("1invalid").is_err());
/// assert!(parse_resource_id("google-topic").is_err());
/// ```
pub fn parse_resource_id(id: &str) -> Result<String, String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err("must not be empty".to_string());
    }

    let len = trimmed.chars().count();
    if !(3..=255).contains(&len) {
        return Err(format!(
            "'{trimmed}' must be between 3 and 255 characters long"
        ));
    }

    let mut chars = trimmed.chars();
    if let Some(first_char) = chars.next() {
        if !first_char.is_ascii_alphabetic() {
            return Err(format!("'{trimmed}' must start with a letter"));
        }
    }

    if let Some(invalid_char) =
        chars.find(|&ch| !ch.is_ascii_alphanumeric() && !"-_.~+%".contains(ch))
    {
        return Err(format!(
            "'{trimmed}' contains invalid character '{invalid_char}'"
        ));
    }

    if trimmed.to_ascii_lowercase().starts_with("goog") {
        return Err(format!("'{trimmed}' must not start with 'goog'"));
    }

    Ok(trimmed.to_string())
}

/// Checks that `address` looks like `host:port` without resolving it.
pub fn parse_host_port(address: &str) -> Result<String, String> {
    let trimmed = address.trim();
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| format!("'{trimmed}' must be host:port"))?;
    if host.is_empty() {
        return Err(format!("'{trimmed}' has an empty host"));
    }
    port.parse::<u16>()
        .map_err(|_| format!("'{trimmed}' has an invalid port '{port}'"))?;
    Ok(trimmed.to_string())
}
