//! Latest-METAR lookups backed by the database with upstream refresh.

use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::metar::Metar;
use super::source::MetarSource;
use crate::config::{WeatherConfig, MAX_DURATION_SECONDS};
use crate::db::MetarRecord;

pub struct MetarService {
    db: SqlitePool,
    source: Arc<dyn MetarSource>,
    stale_after: chrono::Duration,
    negative_ttl: Duration,
    /// Stations upstream had no report for, with the instant the entry lapses
    negative_cache: DashMap<String, Instant>,
}

/// Trim, uppercase and dedupe station ids, keeping first-seen order.
pub fn normalize_icaos<S: AsRef<str>>(icaos: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    icaos
        .iter()
        .map(|icao| icao.as_ref().trim().to_uppercase())
        .filter(|icao| !icao.is_empty())
        .filter(|icao| seen.insert(icao.clone()))
        .collect()
}

impl MetarService {
    pub fn new(db: SqlitePool, source: Arc<dyn MetarSource>, config: &WeatherConfig) -> Self {
        Self {
            db,
            source,
            stale_after: chrono::Duration::seconds(
                config.stale_after_seconds.min(MAX_DURATION_SECONDS) as i64,
            ),
            negative_ttl: Duration::from_secs(
                config.negative_cache_seconds.min(MAX_DURATION_SECONDS),
            ),
            negative_cache: DashMap::new(),
        }
    }

    /// Newest METAR for each requested station, refreshing missing or stale
    /// ones from upstream. Results follow the requested order; stations with
    /// nothing to report are left out.
    pub async fn latest<S: AsRef<str>>(
        &self,
        icaos: &[S],
        force: bool,
    ) -> Result<Vec<Metar>, sqlx::Error> {
        let icaos = normalize_icaos(icaos);
        if icaos.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_station: HashMap<String, Metar> = MetarRecord::latest_for(&self.db, &icaos)
            .await?
            .into_iter()
            .map(|metar| (metar.station_id.clone(), metar))
            .collect();

        let now = Utc::now();
        let wanted: Vec<String> = icaos
            .iter()
            .filter(|icao| match by_station.get(*icao) {
                Some(metar) => now - metar.observation_time > self.stale_after,
                None => true,
            })
            .filter(|icao| force || !self.is_negatively_cached(icao))
            .cloned()
            .collect();

        if !wanted.is_empty() {
            self.refresh(&wanted, &mut by_station).await?;
        }

        Ok(icaos
            .iter()
            .filter_map(|icao| by_station.remove(icao))
            .collect())
    }

    async fn refresh(
        &self,
        wanted: &[String],
        by_station: &mut HashMap<String, Metar>,
    ) -> Result<(), sqlx::Error> {
        let fetched = match self.source.fetch(wanted).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(
                    stations = wanted.len(),
                    error = %e,
                    "METAR refresh failed, serving stored observations"
                );
                return Ok(());
            }
        };

        let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();
        let mut newest: HashMap<String, Metar> = HashMap::new();
        for metar in fetched {
            if !wanted_set.contains(metar.station_id.as_str()) {
                continue;
            }
            match newest.get(&metar.station_id) {
                Some(existing) if existing.observation_time >= metar.observation_time => {}
                _ => {
                    newest.insert(metar.station_id.clone(), metar);
                }
            }
        }

        let fresh: Vec<Metar> = newest.into_values().collect();
        MetarRecord::upsert_many(&self.db, &fresh).await?;
        tracing::debug!(
            requested = wanted.len(),
            received = fresh.len(),
            "Refreshed METARs from upstream"
        );

        let expires_at = Instant::now() + self.negative_ttl;
        let received: HashSet<String> = fresh.iter().map(|m| m.station_id.clone()).collect();
        for icao in wanted {
            if received.contains(icao) {
                self.negative_cache.remove(icao);
            } else {
                self.negative_cache.insert(icao.clone(), expires_at);
            }
        }

        for metar in fresh {
            match by_station.get(&metar.station_id) {
                Some(stored) if stored.observation_time > metar.observation_time => {}
                _ => {
                    by_station.insert(metar.station_id.clone(), metar);
                }
            }
        }
        Ok(())
    }

    fn is_negatively_cached(&self, icao: &str) -> bool {
        // Copy out so the shard guard is released before any removal
        let expires_at = self.negative_cache.get(icao).map(|entry| *entry);
        match expires_at {
            Some(at) if at > Instant::now() => true,
            Some(_) => {
                self.negative_cache.remove(icao);
                false
            }
            None => false,
        }
    }

    /// Drop lapsed negative-cache entries, returning how many were removed.
    pub fn purge_negative_cache(&self) -> usize {
        let now = Instant::now();
        let before = self.negative_cache.len();
        self.negative_cache.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.negative_cache.len())
    }

    pub fn negative_cache_len(&self) -> usize {
        self.negative_cache.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::weather::source::SourceError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Serves canned reports and records which stations were asked for.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub reports: Mutex<HashMap<String, String>>,
        pub calls: Mutex<Vec<Vec<String>>>,
        pub fail: Mutex<bool>,
    }

    impl FakeSource {
        pub(crate) fn with_reports(reports: &[(&str, String)]) -> Self {
            let source = FakeSource::default();
            for (icao, raw) in reports {
                source.reports.lock().insert(icao.to_string(), raw.clone());
            }
            source
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl MetarSource for FakeSource {
        async fn fetch(&self, icaos: &[String]) -> Result<Vec<Metar>, SourceError> {
            self.calls.lock().push(icaos.to_vec());
            if *self.fail.lock() {
                return Err(SourceError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            let reports = self.reports.lock();
            Ok(icaos
                .iter()
                .filter_map(|icao| reports.get(icao))
                .filter_map(|raw| Metar::parse(raw, Utc::now()).ok())
                .collect())
        }
    }

    /// A report stamped `minutes_ago` before now.
    pub(crate) fn report(icao: &str, minutes_ago: i64, tail: &str) -> String {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        format!("{} {}Z {}", icao, at.format("%d%H%M"), tail)
    }

    fn config() -> WeatherConfig {
        WeatherConfig {
            stale_after_seconds: 3600,
            negative_cache_seconds: 3600,
            ..WeatherConfig::default()
        }
    }

    #[test]
    fn test_normalize_icaos() {
        assert_eq!(
            normalize_icaos(&[" kiad", "KIAD", "", "  ", "kdca"]),
            vec!["KIAD", "KDCA"]
        );
    }

    #[tokio::test]
    async fn test_missing_stations_are_fetched_and_stored() {
        let db = test_pool().await;
        let source = Arc::new(FakeSource::with_reports(&[
            ("KIAD", report("KIAD", 10, "21016KT 10SM FEW250 18/06 A3002")),
            ("KDCA", report("KDCA", 10, "18005KT 3SM BR OVC008 12/11 A2998")),
        ]));
        let service = MetarService::new(db.clone(), source.clone(), &config());

        let metars = service.latest(&["kdca", "KIAD"], false).await.unwrap();
        assert_eq!(metars.len(), 2);
        assert_eq!(metars[0].station_id, "KDCA");
        assert_eq!(metars[1].station_id, "KIAD");
        assert_eq!(source.call_count(), 1);
        assert_eq!(MetarRecord::count(&db).await.unwrap(), 2);

        // Fresh data now comes from the database
        let again = service.latest(&["KIAD"], false).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_observation_is_refreshed() {
        let db = test_pool().await;
        let stale = Metar::parse(&report("KIAD", 120, "21016KT 10SM FEW250 18/06 A3002"), Utc::now())
            .unwrap();
        MetarRecord::insert(&db, &stale).await.unwrap();

        let source = Arc::new(FakeSource::with_reports(&[(
            "KIAD",
            report("KIAD", 5, "22012KT 2SM BR OVC006 12/11 A2998"),
        )]));
        let service = MetarService::new(db.clone(), source.clone(), &config());

        let metars = service.latest(&["KIAD"], false).await.unwrap();
        assert_eq!(source.call_count(), 1);
        assert!(metars[0].observation_time > stale.observation_time);
        assert_eq!(metars[0].wind_speed_kt, Some(12.0));
    }

    #[tokio::test]
    async fn test_unknown_station_is_negatively_cached() {
        let db = test_pool().await;
        let source = Arc::new(FakeSource::default());
        let service = MetarService::new(db, source.clone(), &config());

        assert!(service.latest(&["XXXX"], false).await.unwrap().is_empty());
        assert_eq!(service.negative_cache_len(), 1);

        assert!(service.latest(&["XXXX"], false).await.unwrap().is_empty());
        assert_eq!(source.call_count(), 1);

        service.latest(&["XXXX"], true).await.unwrap();
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_negative_cache_entries_lapse() {
        let db = test_pool().await;
        let source = Arc::new(FakeSource::default());
        let config = WeatherConfig {
            negative_cache_seconds: 0,
            ..config()
        };
        let service = MetarService::new(db, source.clone(), &config);

        service.latest(&["XXXX"], false).await.unwrap();
        assert_eq!(service.purge_negative_cache(), 1);
        assert_eq!(service.negative_cache_len(), 0);

        service.latest(&["XXXX"], false).await.unwrap();
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_source_failure_serves_stored_data() {
        let db = test_pool().await;
        let stale = Metar::parse(&report("KIAD", 120, "21016KT 10SM FEW250 18/06 A3002"), Utc::now())
            .unwrap();
        MetarRecord::insert(&db, &stale).await.unwrap();

        let source = Arc::new(FakeSource::default());
        *source.fail.lock() = true;
        let service = MetarService::new(db, source.clone(), &config());

        let metars = service.latest(&["KIAD", "KDCA"], false).await.unwrap();
        assert_eq!(metars.len(), 1);
        assert_eq!(metars[0], stale);
        // A failed fetch says nothing about the stations, so nothing is cached
        assert_eq!(service.negative_cache_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_request_skips_everything() {
        let db = test_pool().await;
        let source = Arc::new(FakeSource::default());
        let service = MetarService::new(db, source.clone(), &config());
        let none: [&str; 0] = [];
        assert!(service.latest(&none, false).await.unwrap().is_empty());
        assert!(service.latest(&[" ", ""], false).await.unwrap().is_empty());
        assert_eq!(source.call_count(), 0);
    }
}
