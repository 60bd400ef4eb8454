// ── Runtime store configuration ──
//
// Tuning knobs for an `ObservableClient`. Core never reads config files;
// `ontoscope-config` (or the embedding application) builds a
// `StoreConfig` and hands it in.

use std::time::Duration;

/// Configuration for one observable client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long a key with no observers stays cached before cleanup.
    /// Zero cleans up as soon as the last observer goes away.
    pub gc_delay: Duration,
    /// Maximum number of concurrent optimistic layers. Actions beyond the
    /// cap run without an optimistic overlay.
    pub max_optimistic_layers: usize,
    /// Page size for list queries that do not request one.
    pub default_page_size: usize,
    /// A loaded entry younger than this is not refetched when a new
    /// observer arrives (unless the observer forces it).
    pub dedupe_interval: Duration,
    /// Refetch lists of affected object types after a successful action,
    /// confirming locally guessed membership.
    pub revalidate_after_action: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_delay: Duration::from_secs(60),
            max_optimistic_layers: 16,
            default_page_size: 100,
            dedupe_interval: Duration::from_secs(2),
            revalidate_after_action: true,
        }
    }
}
