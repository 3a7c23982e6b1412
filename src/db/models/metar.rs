//! Stored METAR observations.
//!
//! Each row keeps the raw report next to the decoded JSON so the parser can
//! evolve without losing the original text.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::common::{now_timestamp, timestamp};
use crate::weather::Metar;

#[derive(Debug, Clone, FromRow)]
pub struct MetarRecord {
    pub station_id: String,
    pub observation_time: String,
    pub raw_text: String,
    pub data: String,
    pub created_at: String,
}

impl MetarRecord {
    /// Decode the stored JSON, falling back to re-parsing the raw text.
    pub fn decode(&self) -> Option<Metar> {
        match serde_json::from_str::<Metar>(&self.data) {
            Ok(metar) => Some(metar),
            Err(e) => {
                tracing::warn!(
                    station = %self.station_id,
                    error = %e,
                    "Stored METAR JSON is unreadable, re-parsing raw text"
                );
                let reference = DateTime::parse_from_rfc3339(&self.observation_time)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                Metar::parse(&self.raw_text, reference).ok()
            }
        }
    }

    /// Latest observation per station for the given ICAO codes.
    pub async fn latest_for(db: &SqlitePool, icaos: &[String]) -> Result<Vec<Metar>, sqlx::Error> {
        if icaos.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT m.station_id, m.observation_time, m.raw_text, m.data, m.created_at
            FROM metars m
            JOIN (
                SELECT station_id, MAX(observation_time) AS observation_time
                FROM metars
                WHERE station_id IN (
            "#,
        );
        let mut separated = qb.separated(", ");
        for icao in icaos {
            separated.push_bind(icao.as_str());
        }
        separated.push_unseparated(
            r#")
                GROUP BY station_id
            ) latest
              ON m.station_id = latest.station_id
             AND m.observation_time = latest.observation_time
            ORDER BY m.station_id
            "#,
        );

        let records: Vec<MetarRecord> = qb.build_query_as().fetch_all(db).await?;
        Ok(records.iter().filter_map(MetarRecord::decode).collect())
    }

    pub async fn insert(db: &SqlitePool, metar: &Metar) -> Result<(), sqlx::Error> {
        MetarRecord::upsert_many(db, std::slice::from_ref(metar)).await?;
        Ok(())
    }

    /// Store observations. A report for an existing station and time
    /// replaces the stored one.
    pub async fn upsert_many(db: &SqlitePool, metars: &[Metar]) -> Result<u64, sqlx::Error> {
        if metars.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        let mut tx = db.begin().await?;
        for metar in metars {
            let data = serde_json::to_string(metar)
                .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
            sqlx::query(
                r#"
                INSERT INTO metars (station_id, observation_time, raw_text, data, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(station_id, observation_time) DO UPDATE SET
                    raw_text = excluded.raw_text,
                    data = excluded.data,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&metar.station_id)
            .bind(timestamp(metar.observation_time))
            .bind(&metar.raw_text)
            .bind(&data)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(metars.len() as u64)
    }

    /// Observation time of the stalest "latest" report among stations whose
    /// latest report is newer than `newer_than`.
    pub async fn oldest_latest_observation(
        db: &SqlitePool,
        newer_than: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let row: (Option<String>,) = sqlx::query_as(
            r#"
            SELECT MIN(latest) FROM (
                SELECT MAX(observation_time) AS latest FROM metars GROUP BY station_id
            )
            WHERE latest > ?
            "#,
        )
        .bind(timestamp(newer_than))
        .fetch_one(db)
        .await?;

        Ok(row
            .0
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    /// Delete observations older than `older_than`, always keeping each
    /// station's latest report. Returns the number of rows removed.
    pub async fn prune_history(
        db: &SqlitePool,
        older_than: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM metars
            WHERE observation_time < ?
              AND observation_time < (
                  SELECT MAX(newer.observation_time) FROM metars newer
                  WHERE newer.station_id = metars.station_id
              )
            "#,
        )
        .bind(timestamp(older_than))
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metars")
            .fetch_one(db)
            .await?;
        Ok(count)
    }
}
