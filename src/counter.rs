//! Transfer counter: total/today with calendar-day rollover.

use crate::config::ConfigStore;
use std::sync::Arc;

/// Bumps both `total` and `today` on the shared `Config`, rolling `today`
/// over first if the calendar day has changed. Backed by `ConfigStore`'s own
/// lock rather than a separate mutex, since the counters live inside
/// `Config::stats`.
pub struct TransferCounter {
    config: Arc<ConfigStore>,
}

impl TransferCounter {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    pub async fn bump(&self) {
        if let Err(e) = self
            .config
            .mutate(|cfg| {
                cfg.roll_stats_if_new_day();
                cfg.stats.total += 1;
                cfg.stats.today += 1;
            })
            .await
        {
            tracing::warn!(error = %e, "failed to persist transfer counter bump");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bump_increments_total_and_today() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::load(dir.path().join("config.json")).await.unwrap());
        let counter = TransferCounter::new(store.clone());

        counter.bump().await;
        counter.bump().await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.stats.total, 2);
        assert_eq!(snapshot.stats.today, 2);
    }
}
