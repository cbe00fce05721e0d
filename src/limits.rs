/// Longest accepted requester name, in bytes.
pub const MAX_NAME_LEN: usize = 200;

/// Longest table name accepted by the local store.
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// Tables a single local store will open.
pub const MAX_TABLES: usize = 64;

/// Rows a single table will hold.
pub const MAX_ROWS_PER_TABLE: usize = 10_000;

/// Offered dates accepted from configuration.
pub const MAX_OFFERED_DATES: usize = 62;

/// Buffered change notifications per table before subscribers lag.
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// Queued caller commands per synchronizer.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Deleted ids a synchronizer remembers between full loads.
pub const MAX_TOMBSTONES: usize = 4096;

/// Largest WAL frame payload accepted on replay.
pub const MAX_WAL_FRAME_LEN: usize = 1 << 20;
