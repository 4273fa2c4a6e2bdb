use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool> {
    let raw = env::var(key).unwrap_or_else(|_| {
        if default {
            "true".to_string()
        } else {
            "false".to_string()
        }
    });

    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{key} must be a boolean, got '{raw}'"),
    }
}

pub(crate) fn parse_usize(key: &str, default: usize) -> Result<usize> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'"))
}

pub(crate) fn parse_u32(key: &str, default: u32) -> Result<u32> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'"))
}

pub(crate) fn parse_optional_path(key: &str) -> Result<Option<PathBuf>> {
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => anyhow::bail!("{key} must not be empty"),
        Ok(raw) => Ok(Some(PathBuf::from(raw))),
        Err(_) => Ok(None),
    }
}
