use std::{env, path::Path, time::Duration};

use chatov_core::{config::load_env_file, errors::Error, Result};

use crate::queue::{QueueConfig, QUEUE_MSG_COUNT_LIMIT, QUEUE_MSG_TIMEOUT};

pub const DEFAULT_PORT: u16 = 6968;
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Typed configuration for the chat queue server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// How long a `get-messages` request is held open waiting for new messages.
    pub request_timeout: Duration,
    pub queue: QueueConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            request_timeout: HTTP_REQUEST_TIMEOUT,
            queue: QueueConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        load_env_file(Path::new(".env"))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let num = |key: &str| -> Result<Option<u64>> {
            match lookup(key).map(|s| s.trim().to_string()) {
                None => Ok(None),
                Some(s) if s.is_empty() => Ok(None),
                Some(s) => s
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("{key} must be an integer, got {s:?}"))),
            }
        };

        let port = match num("CHATOV_PORT")? {
            None => DEFAULT_PORT,
            Some(p) => u16::try_from(p)
                .map_err(|_| Error::Config(format!("CHATOV_PORT out of range: {p}")))?,
        };
        let request_timeout = num("HTTP_REQUEST_TIMEOUT_S")?
            .map(Duration::from_secs)
            .unwrap_or(HTTP_REQUEST_TIMEOUT);
        let capacity = num("QUEUE_MSG_COUNT_LIMIT")?
            .map(|v| v as usize)
            .unwrap_or(QUEUE_MSG_COUNT_LIMIT);
        if capacity == 0 {
            return Err(Error::Config(
                "QUEUE_MSG_COUNT_LIMIT must be at least 1".to_string(),
            ));
        }
        let message_ttl = num("QUEUE_MSG_TIMEOUT_S")?
            .map(Duration::from_secs)
            .unwrap_or(QUEUE_MSG_TIMEOUT);

        Ok(Self {
            port,
            request_timeout,
            queue: QueueConfig {
                capacity,
                message_ttl,
            },
        })
    }
}
