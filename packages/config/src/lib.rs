// ABOUTME: Configuration helpers shared by Forge packages
// ABOUTME: Reads bounded numeric settings from the environment with logged fallbacks

pub mod constants;

use std::ops::RangeInclusive;
use tracing::warn;

/// Read a numeric environment variable, falling back to `default` when the
/// variable is unset, unparsable, or outside `range`.
pub fn env_u64(name: &str, range: RangeInclusive<u64>, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if range.contains(&value) => value,
            Ok(value) => {
                warn!(
                    "{}={} is outside {}..={}, using default {}",
                    name,
                    value,
                    range.start(),
                    range.end(),
                    default
                );
                default
            }
            Err(_) => {
                warn!("{}={:?} is not a number, using default {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
