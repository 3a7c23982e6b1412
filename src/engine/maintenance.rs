//! Periodic housekeeping for sessions, METAR history and in-memory caches.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::config::MAX_DURATION_SECONDS;
use crate::db::{MetarRecord, Session};
use crate::AppState;

pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// What a single maintenance pass removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub sessions_removed: u64,
    pub metars_pruned: u64,
    pub rate_limit_entries_removed: usize,
    pub negative_cache_removed: usize,
}

/// Run one maintenance pass.
pub async fn run_maintenance(state: &AppState) -> Result<MaintenanceStats> {
    let retention = state
        .config
        .weather
        .history_retention_seconds
        .min(MAX_DURATION_SECONDS);
    let cutoff = Utc::now() - chrono::Duration::seconds(retention as i64);

    let stats = MaintenanceStats {
        sessions_removed: Session::delete_expired(&state.db).await?,
        metars_pruned: MetarRecord::prune_history(&state.db, cutoff).await?,
        rate_limit_entries_removed: state.rate_limiter.cleanup_expired(),
        negative_cache_removed: state.metars.purge_negative_cache(),
    };

    if stats != MaintenanceStats::default() {
        tracing::info!(
            sessions = stats.sessions_removed,
            metars = stats.metars_pruned,
            rate_limit_entries = stats.rate_limit_entries_removed,
            negative_cache = stats.negative_cache_removed,
            "Maintenance pass removed stale entries"
        );
    } else {
        tracing::debug!("Maintenance pass found nothing to remove");
    }
    Ok(stats)
}

/// Spawn the background maintenance task
pub fn spawn_maintenance_task(state: Arc<AppState>) {
    tracing::info!(
        interval_secs = MAINTENANCE_INTERVAL.as_secs(),
        "Starting maintenance task"
    );

    tokio::spawn(async move {
        let mut tick = interval(MAINTENANCE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately
        tick.tick().await;

        loop {
            tick.tick().await;
            if let Err(e) = run_maintenance(&state).await {
                tracing::error!(error = %e, "Maintenance pass failed");
            }
        }
    });
}
