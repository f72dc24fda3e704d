use crate::services::storage::{LocationStrategy, StorageDescriptor, Storages};
use std::env;
use tracing::info;

/// Cache and store buckets from `CACHE_BUCKET`/`CACHE_PREFIX` and
/// `STORE_BUCKET`/`STORE_PREFIX`. `STORE_LOCATION=pretty` switches the store
/// to record-scoped paths.
pub fn setup_storages() -> anyhow::Result<Storages> {
    let descriptor = |role: &str| -> anyhow::Result<StorageDescriptor> {
        let bucket = env::var(format!("{}_BUCKET", role))
            .map_err(|_| anyhow::anyhow!("{}_BUCKET must be set", role))?;
        let mut descriptor = StorageDescriptor::new(bucket);
        if let Ok(prefix) = env::var(format!("{}_PREFIX", role)) {
            descriptor = descriptor.with_prefix(prefix);
        }
        Ok(descriptor)
    };

    let cache = descriptor("CACHE")?;
    let mut store = descriptor("STORE")?;
    if env::var("STORE_LOCATION").is_ok_and(|v| v.eq_ignore_ascii_case("pretty")) {
        store = store.with_location(LocationStrategy::Pretty);
    }

    info!("🪣 Storages: cache={} store={}", cache.bucket, store.bucket);
    Ok(Storages::new(cache, store))
}
