//! Background METAR refresh for every stored airport.
//!
//! A cycle walks all airport ICAO codes in batches and asks the METAR service
//! for each batch with the negative cache bypassed, so only missing or stale
//! stations reach upstream. The next cycle starts when the earliest fresh
//! observation is due to go stale.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RefreshConfig;
use crate::db::{Airport, MetarRecord};
use crate::AppState;

/// Time until `oldest` goes stale, clamped to `[min, max]`.
///
/// With no fresh observation to wait for the cycle sleeps for `max`.
pub fn next_delay(
    oldest: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_after: Duration,
    min: Duration,
    max: Duration,
) -> Duration {
    let Some(oldest) = oldest else {
        return max;
    };
    // An observation stamped in the future counts as brand new
    let age = (now - oldest).to_std().unwrap_or(Duration::ZERO);
    stale_after.saturating_sub(age).clamp(min, max)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub airports: usize,
    pub batches: usize,
    pub metars: usize,
}

pub struct MetarRefresher {
    state: Arc<AppState>,
    config: RefreshConfig,
    stale_after: Duration,
}

impl MetarRefresher {
    pub fn new(state: Arc<AppState>) -> Self {
        let config = state.config.refresh.clone();
        let stale_after = Duration::from_secs(state.config.weather.stale_after_seconds);
        Self {
            state,
            config,
            stale_after,
        }
    }

    /// Refresh every airport once. Stops between batches when `shutdown`
    /// flips to true.
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<RefreshStats> {
        let icaos = Airport::all_icaos(&self.state.db).await?;
        let mut stats = RefreshStats {
            airports: icaos.len(),
            ..RefreshStats::default()
        };

        let batch_delay = Duration::from_millis(self.config.batch_delay_ms);
        for (index, batch) in icaos.chunks(self.config.batch_size.max(1)).enumerate() {
            if *shutdown.borrow() {
                break;
            }
            if index > 0 && !batch_delay.is_zero() && wait_or_shutdown(batch_delay, shutdown).await {
                break;
            }

            let metars = self.state.metars.latest(batch, true).await?;
            stats.batches += 1;
            stats.metars += metars.len();
        }

        tracing::info!(
            airports = stats.airports,
            batches = stats.batches,
            metars = stats.metars,
            "METAR refresh cycle finished"
        );
        Ok(stats)
    }

    /// Delay before the next cycle.
    pub async fn next_cycle_delay(&self, airports: usize) -> Result<Duration> {
        let min = Duration::from_secs(self.config.min_interval_seconds);
        let max = Duration::from_secs(self.config.max_interval_seconds);
        if airports == 0 {
            return Ok(max);
        }

        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(self.stale_after)?;
        let oldest = MetarRecord::oldest_latest_observation(&self.state.db, cutoff).await?;
        Ok(next_delay(oldest, now, self.stale_after, min, max))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let max = Duration::from_secs(self.config.max_interval_seconds);
        loop {
            let delay = match self.run_cycle(&mut shutdown).await {
                Ok(stats) => match self.next_cycle_delay(stats.airports).await {
                    Ok(delay) => delay,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to schedule next METAR refresh");
                        max
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "METAR refresh cycle failed");
                    max
                }
            };

            tracing::debug!(delay_secs = delay.as_secs(), "Next METAR refresh scheduled");
            if wait_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }
        tracing::info!("METAR refresh task stopped");
    }
}

/// Sleep for `delay`. Returns true when shutdown was requested first.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => {
            // A dropped sender also means shutdown
            changed.is_err() || *shutdown.borrow()
        }
    }
}

/// Spawn the background refresh task when enabled in config
pub fn spawn_metar_refresh_task(
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let config = &state.config.refresh;
    if !config.enabled {
        tracing::info!("Background METAR refresh is disabled");
        return None;
    }

    tracing::info!(
        batch_size = config.batch_size,
        batch_delay_ms = config.batch_delay_ms,
        min_interval_secs = config.min_interval_seconds,
        max_interval_secs = config.max_interval_seconds,
        "Starting METAR refresh task"
    );

    let refresher = MetarRefresher::new(state);
    Some(tokio::spawn(refresher.run(shutdown)))
}
