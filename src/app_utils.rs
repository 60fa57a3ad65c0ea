use tracing::info;

/// Convert the configured cache size to bytes, with a floor so sled always
/// has something to work with.
pub fn cache_capacity_bytes(cache_size_mb: usize) -> u64 {
    (cache_size_mb.max(1) as u64) * 1024 * 1024
}

/// Open a sled database with the daemon's standard configuration
pub fn open_sled_database(path: &str, cache_capacity: u64) -> Result<sled::Db, sled::Error> {
    info!(
        path = path,
        cache_mb = cache_capacity / (1024 * 1024),
        "Opening sled registry"
    );

    sled::Config::new()
        .path(path)
        .cache_capacity(cache_capacity)
        .mode(sled::Mode::HighThroughput)
        .open()
}
