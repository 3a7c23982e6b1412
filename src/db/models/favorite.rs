//! Per-user favorite airports.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::common::now_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteRequest {
    pub icao: String,
}

pub struct Favorite;

impl Favorite {
    /// ICAO codes favorited by the user, oldest first.
    pub async fn list(db: &SqlitePool, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT airport_icao FROM favorites WHERE user_id = ? ORDER BY created_at, airport_icao",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|(icao,)| icao).collect())
    }

    /// Returns false when the airport was already a favorite.
    pub async fn add(db: &SqlitePool, user_id: &str, icao: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO favorites (user_id, airport_icao, created_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id, airport_icao) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(icao)
        .bind(now_timestamp())
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the airport was not a favorite.
    pub async fn remove(db: &SqlitePool, user_id: &str, icao: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND airport_icao = ?")
            .bind(user_id)
            .bind(icao)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Airport, User, ROLE_USER};
    use crate::db::{sample_airport, test_pool};

    #[tokio::test]
    async fn test_favorites() {
        let db = test_pool().await;
        let user = User::create(&db, "a@b.co", "hash", "", "", ROLE_USER)
            .await
            .unwrap();
        Airport::insert_many(
            &db,
            &[
                sample_airport("KIAD", 38.9, -77.4),
                sample_airport("KDCA", 38.8, -77.0),
            ],
        )
        .await
        .unwrap();

        assert!(Favorite::add(&db, &user.id, "KIAD").await.unwrap());
        assert!(!Favorite::add(&db, &user.id, "KIAD").await.unwrap());
        assert!(Favorite::add(&db, &user.id, "KDCA").await.unwrap());
        assert_eq!(Favorite::list(&db, &user.id).await.unwrap().len(), 2);

        assert!(Favorite::remove(&db, &user.id, "KIAD").await.unwrap());
        assert!(!Favorite::remove(&db, &user.id, "KIAD").await.unwrap());
        assert_eq!(Favorite::list(&db, &user.id).await.unwrap(), vec!["KDCA"]);
    }

    #[tokio::test]
    async fn test_favorites_follow_airport_lifecycle() {
        let db = test_pool().await;
        let user = User::create(&db, "a@b.co", "hash", "", "", ROLE_USER)
            .await
            .unwrap();
        Airport::create(&db, &sample_airport("KIAD", 38.9, -77.4))
            .await
            .unwrap();
        Favorite::add(&db, &user.id, "KIAD").await.unwrap();

        Airport::delete(&db, "KIAD").await.unwrap();
        assert!(Favorite::list(&db, &user.id).await.unwrap().is_empty());
    }
}
