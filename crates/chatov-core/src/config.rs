use std::{env, fs, io, path::Path, time::Duration};

use crate::{buffer::BufferConfig, errors::Error, sync::RetryPolicy, Result};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:6968/";

/// Typed configuration for the overlay client.
#[derive(Clone, Debug)]
pub struct Config {
    // Server
    pub server_url: String,
    pub request_timeout: Duration,

    // Poll/retry
    pub retry: RetryPolicy,

    // Display buffer
    pub buffer: BufferConfig,

    // Display scale
    pub user_scale: f64,
    pub device_pixel_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: Duration::from_millis(30_000),
            retry: RetryPolicy::default(),
            buffer: BufferConfig::default(),
            user_scale: 1.0,
            device_pixel_ratio: 1.0,
        }
    }
}

impl Config {
    /// Load from the environment (and `.env`, which never overrides existing variables).
    pub fn load() -> Result<Self> {
        load_env_file(Path::new(".env"))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Config::default();

        let server_url = lookup("CHATOV_SERVER_URL")
            .and_then(non_empty)
            .map(|u| with_trailing_slash(u.trim()))
            .unwrap_or(d.server_url);
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "CHATOV_SERVER_URL must be an http(s) URL, got {server_url:?}"
            )));
        }

        let request_timeout = millis(&lookup, "REQUEST_TIMEOUT_MS")?.unwrap_or(d.request_timeout);
        if request_timeout.is_zero() {
            return Err(Error::Config("REQUEST_TIMEOUT_MS must be positive".to_string()));
        }

        let retry = RetryPolicy {
            poll_interval: millis(&lookup, "POLL_INTERVAL_MS")?.unwrap_or(d.retry.poll_interval),
            protocol_retry: millis(&lookup, "PROTOCOL_RETRY_MS")?
                .unwrap_or(d.retry.protocol_retry),
            transport_retry: millis(&lookup, "TRANSPORT_RETRY_MS")?
                .unwrap_or(d.retry.transport_retry),
            timeout_retry: d.retry.timeout_retry,
        };

        let max_messages = parsed::<usize>(&lookup, "MESSAGE_COUNT_MAX")?
            .unwrap_or(d.buffer.max_messages);
        if max_messages == 0 {
            return Err(Error::Config("MESSAGE_COUNT_MAX must be at least 1".to_string()));
        }
        let buffer = BufferConfig {
            max_messages,
            message_timeout: millis(&lookup, "MESSAGE_TIMEOUT_MS")?
                .unwrap_or(d.buffer.message_timeout),
            remove_animation: millis(&lookup, "MESSAGE_REMOVE_ANIMATION_MS")?
                .unwrap_or(d.buffer.remove_animation),
        };

        let user_scale = positive(&lookup, "OVERLAY_SCALE")?.unwrap_or(d.user_scale);
        let device_pixel_ratio =
            positive(&lookup, "DEVICE_PIXEL_RATIO")?.unwrap_or(d.device_pixel_ratio);

        Ok(Self {
            server_url,
            request_timeout,
            retry,
            buffer,
            user_scale,
            device_pixel_ratio,
        })
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parsed::<u64>(lookup, key)?.map(Duration::from_millis))
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<f64>> {
    match parsed::<f64>(lookup, key)? {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(Error::Config(format!(
            "{key} must be a positive number, got {v}"
        ))),
        other => Ok(other),
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Export the assignments in an env file, keeping variables that are already set.
///
/// A missing file is not an error. Returns how many variables were set.
pub fn load_env_file(path: &Path) -> Result<usize> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot read env file: {e}");
            return Err(e.into());
        }
    };

    let mut applied = 0;
    for (key, value) in env_assignments(&contents) {
        if env::var_os(key).is_none() {
            env::set_var(key, value);
            applied += 1;
        }
    }
    tracing::debug!(path = %path.display(), applied, "env file loaded");
    Ok(applied)
}

/// `KEY=value` pairs in file order. Blank lines, `#` comments, an `export ` prefix and one
/// level of matching quotes around the value are handled; anything else is skipped.
fn env_assignments(contents: &str) -> impl Iterator<Item = (&str, &str)> {
    contents.lines().filter_map(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return None;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        Some((key, unquote(value.trim())))
    })
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|&q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
