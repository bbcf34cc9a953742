use std::time::{Duration, SystemTime};

/// Cache-control style freshness metadata for a loaded tile.
///
/// Only maintained when the source runs with `refresh_expired_tiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpiryData {
    /// Instant after which the tile's data is stale
    pub expires_at: Option<SystemTime>,
}

impl ExpiryData {
    pub fn at(expires_at: SystemTime) -> Self {
        Self {
            expires_at: Some(expires_at),
        }
    }

    /// Build expiry data from a `Cache-Control` value and an `Expires` instant.
    ///
    /// A `max-age` directive takes precedence over `expires`.
    pub fn from_cache_control(
        cache_control: Option<&str>,
        expires: Option<SystemTime>,
        now: SystemTime,
    ) -> Self {
        let max_age = cache_control.and_then(parse_max_age);
        match max_age {
            Some(age) => Self::at(now + age),
            None => Self { expires_at: expires },
        }
    }

    /// Whether the data is stale at `now`. Tiles without an expiry never are.
    pub fn is_stale(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value.trim().trim_matches('"').parse::<u64>().ok()
        })
        .map(Duration::from_secs)
}
