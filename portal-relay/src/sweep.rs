//! Background expiry sweep.
//!
//! One periodic task does two independent jobs: removing portals that have
//! gone silent past the idle window (purging their buckets and flagging
//! survivors for a roster refresh), and deleting stored items past their
//! TTL regardless of portal liveness.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::config::{StorageConfig, SweepConfig};
use crate::http::RelayState;

/// Spawn the background sweep task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sweep_task(
    state: Arc<RelayState>,
    sweep: SweepConfig,
    storage: StorageConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !sweep.enabled {
            tracing::info!("Sweep task disabled");
            return;
        }

        let idle_window = Duration::from_secs(sweep.idle_window_secs);
        let item_ttl = Duration::from_secs(storage.item_ttl_secs);
        tracing::info!(
            "Sweep task started (interval: {}s, idle window: {}s, item TTL: {}s)",
            sweep.interval_secs,
            sweep.idle_window_secs,
            storage.item_ttl_secs
        );

        let mut timer = interval(Duration::from_secs(sweep.interval_secs));
        loop {
            timer.tick().await;
            run_sweep(&state, idle_window, item_ttl);
        }
    })
}

/// One sweep pass. Errors are logged and never escape.
pub fn run_sweep(state: &RelayState, idle_window: Duration, item_ttl: Duration) {
    let removed = state.directory.remove_idle(idle_window);
    for portal in &removed {
        if let Err(e) = state.store.purge_bucket(&portal.id) {
            tracing::error!("Failed to purge bucket for {}: {}", portal.id, e);
        }
    }
    if !removed.is_empty() {
        tracing::info!("Sweep: expired {} idle portal(s)", removed.len());
    }

    match state.store.sweep_expired(item_ttl) {
        Ok(deleted) if deleted > 0 => {
            tracing::info!("Sweep: deleted {} expired item(s)", deleted);
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Item sweep error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use portal_crypto::PortalKeyPair;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn test_state(dir: &TempDir) -> Arc<RelayState> {
        let mut config = Config::default();
        config.storage.root = dir.path().to_path_buf();
        Arc::new(RelayState::from_config(&config, "seed").unwrap())
    }

    #[test]
    fn sweep_purges_expired_portal_and_its_bucket() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let key = PortalKeyPair::generate().public_bytes();
        let id = state.directory.register("alpha", key, None).unwrap();
        state.store.put(&id, &mut Cursor::new(b"pending")).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        run_sweep(&state, Duration::from_millis(10), Duration::from_secs(3600));

        assert!(state.directory.get(&id).is_none());
        assert!(state.store.list_pending(&id, 10).unwrap().is_empty());
    }

    #[test]
    fn sweep_flags_surviving_portals() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let key = PortalKeyPair::generate().public_bytes();
        let idle = state.directory.register("idle", key, None).unwrap();
        let key = PortalKeyPair::generate().public_bytes();
        let live = state.directory.register("live", key, None).unwrap();
        let _ = state.directory.poll_flags(&live);

        std::thread::sleep(Duration::from_millis(20));
        state.directory.touch(&live);
        run_sweep(&state, Duration::from_millis(10), Duration::from_secs(3600));

        assert!(state.directory.get(&idle).is_none());
        assert!(state.directory.get(&live).unwrap().needs_roster_refresh);
    }

    #[tokio::test]
    async fn disabled_sweep_task_exits_immediately() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let config = Config::default();

        let handle = spawn_sweep_task(
            state,
            SweepConfig {
                interval_secs: 1,
                idle_window_secs: 60,
                enabled: false,
            },
            config.storage,
        );

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should complete when disabled")
            .expect("task should not panic");
    }
}
