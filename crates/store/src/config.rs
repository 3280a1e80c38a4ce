use berth_core::EndpointId;

/// Line counts offered by log screens.
pub const LOG_LINE_CHOICES: [u32; 4] = [100, 1_000, 10_000, 100_000];

/// The offered line count closest to `n`.
pub fn nearest_line_choice(n: u32) -> u32 {
    LOG_LINE_CHOICES.iter().copied().min_by_key(|c| c.abs_diff(n)).unwrap_or(LOG_LINE_CHOICES[0])
}

/// Store and fetcher tunables, read from `BERTH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of the store event broadcast channel.
    pub event_capacity: usize,
    /// Endpoint selected at setup when no previous selection survives.
    pub preferred_endpoint: Option<EndpointId>,
    pub log_lines: u32,
    pub log_timestamps: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { event_capacity: 64, preferred_endpoint: None, log_lines: LOG_LINE_CHOICES[0], log_timestamps: false }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let event_capacity = std::env::var("BERTH_EVENT_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(d.event_capacity);
        let preferred_endpoint = std::env::var("BERTH_PREFERRED_ENDPOINT").ok().and_then(|s| s.parse().ok());
        let log_lines = std::env::var("BERTH_LOG_LINES")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(nearest_line_choice)
            .unwrap_or(d.log_lines);
        let log_timestamps = std::env::var("BERTH_LOG_TIMESTAMPS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(d.log_timestamps);
        Self { event_capacity, preferred_endpoint, log_lines, log_timestamps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_counts_snap_to_choices() {
        assert_eq!(nearest_line_choice(0), 100);
        assert_eq!(nearest_line_choice(800), 1_000);
        assert_eq!(nearest_line_choice(10_000), 10_000);
        assert_eq!(nearest_line_choice(5_000_000), 100_000);
    }
}
