//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so the client starts with zero
//! configuration.  The loaded config is handed to [`crate::state::AppState`]
//! and never read from the environment again.

use std::path::PathBuf;

use chrono::{FixedOffset, Local, Offset};
use uuid::Uuid;

use tidings_shared::constants::DEFAULT_FETCH_BATCH_SIZE;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite cache file.
    /// Env: `TIDINGS_DB_PATH`
    /// Default: `None`, the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Stable id stamped on outgoing messages.
    /// Env: `TIDINGS_SENDER_ID`
    /// Default: a random UUID per process.
    pub sender_id: String,

    /// Display name stamped on outgoing messages.
    /// Env: `TIDINGS_SENDER_NAME`
    pub sender_name: String,

    /// Rows read per page when materializing a list.
    /// Env: `TIDINGS_FETCH_BATCH_SIZE`
    pub fetch_batch_size: usize,

    /// Offset used to cut message lists into calendar days.
    /// Env: `TIDINGS_UTC_OFFSET_MINUTES`
    /// Default: the local offset at startup.
    pub utc_offset: FixedOffset,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            sender_id: Uuid::new_v4().to_string(),
            sender_name: "Anonymous".to_string(),
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            utc_offset: Local::now().offset().fix(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TIDINGS_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(id) = lookup("TIDINGS_SENDER_ID") {
            if !id.trim().is_empty() {
                config.sender_id = id.trim().to_string();
            }
        }

        if let Some(name) = lookup("TIDINGS_SENDER_NAME") {
            if !name.trim().is_empty() {
                config.sender_name = name.trim().to_string();
            }
        }

        if let Some(val) = lookup("TIDINGS_FETCH_BATCH_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.fetch_batch_size = n,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid TIDINGS_FETCH_BATCH_SIZE, using default"
                ),
            }
        }

        if let Some(val) = lookup("TIDINGS_UTC_OFFSET_MINUTES") {
            match parse_offset_minutes(&val) {
                Some(offset) => config.utc_offset = offset,
                None => tracing::warn!(
                    value = %val,
                    "Invalid TIDINGS_UTC_OFFSET_MINUTES, using local offset"
                ),
            }
        }

        config
    }
}

fn parse_offset_minutes(raw: &str) -> Option<FixedOffset> {
    let minutes: i32 = raw.trim().parse().ok()?;
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}
