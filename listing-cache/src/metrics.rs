use prometheus::{IntCounter, Registry};

#[derive(Clone)]
pub struct CacheMetrics {
    pub registry: Registry,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub reservation_success: IntCounter,
    pub reservation_conflict: IntCounter,
    pub reservation_degraded: IntCounter,
    pub dispatch_retries: IntCounter,
    pub dispatch_dead_letters: IntCounter,
    pub migrations_completed: IntCounter,
}

impl CacheMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let cache_hits = IntCounter::new(
            "listing_cache_hits_total",
            "Item/order detail reads served from cache",
        )
        .unwrap();
        let cache_misses = IntCounter::new(
            "listing_cache_misses_total",
            "Item/order detail reads that fell through to the durable store",
        )
        .unwrap();
        let reservation_success = IntCounter::new(
            "reservation_success_total",
            "Reservations that won the item",
        )
        .unwrap();
        let reservation_conflict = IntCounter::new(
            "reservation_conflict_total",
            "Reservations rejected because the item was already taken",
        )
        .unwrap();
        let reservation_degraded = IntCounter::new(
            "reservation_degraded_total",
            "Reservations processed on the non-atomic fallback path",
        )
        .unwrap();
        let dispatch_retries = IntCounter::new(
            "dispatch_retry_total",
            "Change events republished after a consumer failure",
        )
        .unwrap();
        let dispatch_dead_letters = IntCounter::new(
            "dispatch_dead_letter_total",
            "Change events abandoned after exhausting the retry budget",
        )
        .unwrap();
        let migrations_completed = IntCounter::new(
            "id_migrations_total",
            "Provisional-to-permanent identifier migrations completed",
        )
        .unwrap();
        let _ = registry.register(Box::new(cache_hits.clone()));
        let _ = registry.register(Box::new(cache_misses.clone()));
        let _ = registry.register(Box::new(reservation_success.clone()));
        let _ = registry.register(Box::new(reservation_conflict.clone()));
        let _ = registry.register(Box::new(reservation_degraded.clone()));
        let _ = registry.register(Box::new(dispatch_retries.clone()));
        let _ = registry.register(Box::new(dispatch_dead_letters.clone()));
        let _ = registry.register(Box::new(migrations_completed.clone()));
        CacheMetrics {
            registry,
            cache_hits,
            cache_misses,
            reservation_success,
            reservation_conflict,
            reservation_degraded,
            dispatch_retries,
            dispatch_dead_letters,
            migrations_completed,
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}
