/// Application name
pub const APP_NAME: &str = "Tidings";

/// Records materialized per read page when nothing else is configured
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 22;

/// Snapshot cache names used by the two list screens
pub const CHANNELS_CACHE_NAME: &str = "channelsCache";
pub const MESSAGES_CACHE_NAME: &str = "messagesCache";

/// Capacity of the bounded feed delivery channel
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// chrono format of calendar-day section labels, e.g. "5 March 2024"
pub const SECTION_DATE_FORMAT: &str = "%-d %B %Y";

/// Maximum accepted length of an outgoing message, in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Years a record timestamp may fall in; the cache stores four-digit years
pub const MIN_TIMESTAMP_YEAR: i32 = 1;
pub const MAX_TIMESTAMP_YEAR: i32 = 9999;
