//! Parsing of Redis and Sentinel text replies.
//!
//! All functions here are pure and use regex patterns rather than ad hoc
//! string splitting, so they can be tested without a server.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

use super::types::{ArbiterView, RoleInfo};

/// Errors that can occur during parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to compile regex: {0}")]
    RegexCompilation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Configuration keys whose values are byte sizes and may be written with
/// a unit suffix (`100mb`) while Redis reports them in plain bytes.
pub const MEMORY_CONFIG_KEYS: &[&str] = &[
    "maxmemory",
    "proto-max-bulk-len",
    "client-query-buffer-limit",
    "repl-backlog-size",
    "auto-aof-rewrite-min-size",
    "active-defrag-ignore-bytes",
    "hash-max-ziplist-entries",
    "hash-max-ziplist-value",
    "stream-node-max-bytes",
    "set-max-intset-entries",
    "zset-max-ziplist-entries",
    "zset-max-ziplist-value",
    "hll-sparse-max-bytes",
];

/// Whether `key` holds a byte size that needs unit normalization.
///
/// Config names are case-insensitive.
pub fn is_memory_key(key: &str) -> bool {
    MEMORY_CONFIG_KEYS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(key))
}

/// Parse key-value pairs from INFO output.
///
/// INFO output format: `key:value` per line, with optional section headers starting with `#`.
///
/// # Example
/// ```
/// use redis_operator::client::parsing::parse_info_output;
///
/// let info = "# Replication\nrole:slave\nmaster_host:10.0.0.9\n";
/// let parsed = parse_info_output(info).unwrap();
/// assert_eq!(parsed.get("master_host"), Some(&"10.0.0.9".to_string()));
/// ```
pub fn parse_info_output(info: &str) -> Result<HashMap<String, String>, ParseError> {
    let kv_regex =
        Regex::new(r"^([\w-]+):(.+)$").map_err(|e| ParseError::RegexCompilation(e.to_string()))?;

    let mut result = HashMap::new();

    for line in info.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = kv_regex.captures(line)
            && let (Some(key), Some(value)) = (caps.get(1), caps.get(2))
        {
            result.insert(key.as_str().to_string(), value.as_str().trim().to_string());
        }
    }

    Ok(result)
}

/// Parse the replication role from `INFO replication`.
///
/// A replica without a `master_host` line is reported with `master_host: None`.
pub fn parse_role(info: &str) -> Result<RoleInfo, ParseError> {
    let parsed = parse_info_output(info)?;
    let role = parsed
        .get("role")
        .ok_or_else(|| ParseError::MissingField("role".to_string()))?;

    match role.as_str() {
        "master" => Ok(RoleInfo::master()),
        "slave" | "replica" => Ok(RoleInfo {
            is_master: false,
            master_host: parsed.get("master_host").filter(|h| !h.is_empty()).cloned(),
        }),
        other => Err(ParseError::Parse(format!("unknown role '{other}'"))),
    }
}

/// Parse a sentinel's view of its first monitored master from `INFO sentinel`.
///
/// The relevant line looks like
/// `master0:name=mymaster,status=ok,address=10.0.0.9:6379,slaves=2,sentinels=3`.
/// A sentinel that monitors nothing yields an empty view.
pub fn parse_sentinel_info(info: &str) -> Result<ArbiterView, ParseError> {
    let master_regex = Regex::new(
        r"^master0:name=([^,]+),status=([^,]+),address=([^,]*):(\d+),slaves=(\d+),sentinels=(\d+)$",
    )
    .map_err(|e| ParseError::RegexCompilation(e.to_string()))?;

    for line in info.lines() {
        let Some(caps) = master_regex.captures(line.trim()) else {
            continue;
        };

        let address = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .filter(|a| !a.is_empty());
        let slaves = parse_count(caps.get(5).map(|m| m.as_str()), "slaves")?;
        let sentinels = parse_count(caps.get(6).map(|m| m.as_str()), "sentinels")?;

        return Ok(ArbiterView {
            monitored_master: address,
            known_replicas: slaves,
            known_sentinels: sentinels,
        });
    }

    Ok(ArbiterView::default())
}

fn parse_count(raw: Option<&str>, field: &str) -> Result<i32, ParseError> {
    raw.ok_or_else(|| ParseError::MissingField(field.to_string()))?
        .parse()
        .map_err(|e| ParseError::Parse(format!("{field}: {e}")))
}

/// Turn a flat `[key, value, key, value, ...]` reply (CONFIG GET, SENTINEL MASTER)
/// into a map. A trailing key without a value is dropped.
pub fn parse_config_pairs(reply: &[String]) -> HashMap<String, String> {
    reply
        .chunks_exact(2)
        .filter_map(|pair| match pair {
            [key, value] => Some((key.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

/// Normalize a memory size to its byte count as Redis reports it.
///
/// Suffixes follow redis.conf: `k`/`m`/`g` are powers of 1000,
/// `kb`/`mb`/`gb` are powers of 1024, `b` is bytes. Case is ignored.
///
/// ```
/// use redis_operator::client::parsing::normalize_memory_value;
///
/// assert_eq!(normalize_memory_value("100mb").unwrap(), "104857600");
/// assert_eq!(normalize_memory_value("1g").unwrap(), "1000000000");
/// assert_eq!(normalize_memory_value("512").unwrap(), "512");
/// ```
pub fn normalize_memory_value(value: &str) -> Result<String, ParseError> {
    let mem_regex = Regex::new(r"(?i)^(-?\d+)(kb|mb|gb|k|m|g|b)?$")
        .map_err(|e| ParseError::RegexCompilation(e.to_string()))?;

    let trimmed = value.trim();
    let caps = mem_regex
        .captures(trimmed)
        .ok_or_else(|| ParseError::Parse(format!("invalid memory value '{value}'")))?;

    let digits: i64 = caps
        .get(1)
        .ok_or_else(|| ParseError::MissingField("digits".to_string()))?
        .as_str()
        .parse()
        .map_err(|e| ParseError::Parse(format!("invalid memory value '{value}': {e}")))?;

    let multiplier: i64 = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("k") => 1_000,
        Some("kb") => 1_024,
        Some("m") => 1_000_000,
        Some("mb") => 1_024 * 1_024,
        Some("g") => 1_000_000_000,
        Some("gb") => 1_024 * 1_024 * 1_024,
        _ => 1,
    };

    digits
        .checked_mul(multiplier)
        .map(|bytes| bytes.to_string())
        .ok_or_else(|| ParseError::Parse(format!("memory value '{value}' overflows")))
}
