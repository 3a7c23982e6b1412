//! Airport, runway and frequency models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::common::now_timestamp;
use crate::geo::Bounds;
use crate::weather::Metar;

/// Airport categories as published in the OurAirports dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AirportCategory {
    SmallAirport,
    MediumAirport,
    LargeAirport,
    Heliport,
    Closed,
    SeaplaneBase,
    Balloonport,
    #[default]
    Unknown,
}

impl AirportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AirportCategory::SmallAirport => "small_airport",
            AirportCategory::MediumAirport => "medium_airport",
            AirportCategory::LargeAirport => "large_airport",
            AirportCategory::Heliport => "heliport",
            AirportCategory::Closed => "closed",
            AirportCategory::SeaplaneBase => "seaplane_base",
            AirportCategory::Balloonport => "balloonport",
            AirportCategory::Unknown => "unknown",
        }
    }
}

impl FromStr for AirportCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "small_airport" => AirportCategory::SmallAirport,
            "medium_airport" => AirportCategory::MediumAirport,
            "large_airport" => AirportCategory::LargeAirport,
            "heliport" => AirportCategory::Heliport,
            "closed" => AirportCategory::Closed,
            "seaplane_base" => AirportCategory::SeaplaneBase,
            "balloonport" | "balloon_port" => AirportCategory::Balloonport,
            _ => AirportCategory::Unknown,
        })
    }
}

impl From<String> for AirportCategory {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(category) => category,
            Err(never) => match never {},
        }
    }
}

impl From<AirportCategory> for String {
    fn from(category: AirportCategory) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for AirportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Runway {
    pub id: String,
    pub length_ft: Option<f64>,
    pub width_ft: Option<f64>,
    pub surface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Frequency {
    pub id: String,
    pub frequency_mhz: f64,
}

/// An airport as exchanged with clients and stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub icao: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    pub name: String,
    #[serde(default)]
    pub category: AirportCategory,
    #[serde(default)]
    pub iso_country: String,
    #[serde(default)]
    pub iso_region: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default)]
    pub elevation_ft: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_tower: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_beacon: Option<bool>,
    #[serde(default)]
    pub runways: Vec<Runway>,
    #[serde(default)]
    pub frequencies: Vec<Frequency>,
    #[serde(default = "default_public")]
    pub public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_metar: Option<Metar>,
}

fn default_public() -> bool {
    true
}

#[derive(Debug, FromRow)]
struct AirportRow {
    icao: String,
    iata: Option<String>,
    local_code: Option<String>,
    name: String,
    category: String,
    iso_country: String,
    iso_region: String,
    municipality: String,
    elevation_ft: Option<f64>,
    latitude: f64,
    longitude: f64,
    has_tower: Option<bool>,
    has_beacon: Option<bool>,
    public: bool,
}

impl From<AirportRow> for Airport {
    fn from(row: AirportRow) -> Self {
        Self {
            icao: row.icao,
            iata: row.iata,
            local: row.local_code,
            name: row.name,
            category: AirportCategory::from(row.category),
            iso_country: row.iso_country,
            iso_region: row.iso_region,
            municipality: row.municipality,
            elevation_ft: row.elevation_ft,
            latitude: row.latitude,
            longitude: row.longitude,
            has_tower: row.has_tower,
            has_beacon: row.has_beacon,
            runways: Vec::new(),
            frequencies: Vec::new(),
            public: row.public,
            latest_metar: None,
        }
    }
}

#[derive(Debug, FromRow)]
struct RunwayRow {
    airport_icao: String,
    #[sqlx(flatten)]
    runway: Runway,
}

#[derive(Debug, FromRow)]
struct FrequencyRow {
    airport_icao: String,
    #[sqlx(flatten)]
    frequency: Frequency,
}

/// Partial update. Absent fields are left alone; present runway or frequency
/// lists replace the stored ones wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAirport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<AirportCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_ft: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_tower: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_beacon: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runways: Option<Vec<Runway>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<Vec<Frequency>>,
}

impl UpdateAirport {
    fn apply(self, airport: &mut Airport) {
        if let Some(icao) = self.icao {
            airport.icao = icao;
        }
        if let Some(iata) = self.iata {
            airport.iata = Some(iata);
        }
        if let Some(local) = self.local {
            airport.local = Some(local);
        }
        if let Some(name) = self.name {
            airport.name = name;
        }
        if let Some(category) = self.category {
            airport.category = category;
        }
        if let Some(iso_country) = self.iso_country {
            airport.iso_country = iso_country;
        }
        if let Some(iso_region) = self.iso_region {
            airport.iso_region = iso_region;
        }
        if let Some(municipality) = self.municipality {
            airport.municipality = municipality;
        }
        if let Some(elevation_ft) = self.elevation_ft {
            airport.elevation_ft = Some(elevation_ft);
        }
        if let Some(latitude) = self.latitude {
            airport.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            airport.longitude = longitude;
        }
        if let Some(has_tower) = self.has_tower {
            airport.has_tower = Some(has_tower);
        }
        if let Some(has_beacon) = self.has_beacon {
            airport.has_beacon = Some(has_beacon);
        }
        if let Some(public) = self.public {
            airport.public = public;
        }
        if let Some(runways) = self.runways {
            airport.runways = runways;
        }
        if let Some(frequencies) = self.frequencies {
            airport.frequencies = frequencies;
        }
    }
}

/// Raw query string accepted by the airport listing endpoint. List valued
/// filters are comma separated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirportQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icaos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iatas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_countries: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_regions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipalities: Option<String>,
    /// Case-insensitive substring match on name or ICAO
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `ne_lat,ne_lon,sw_lat,sw_lon`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    /// Embed the latest METAR for each result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metars: Option<bool>,
    /// Only airports with at least one stored METAR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_metar: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderField {
    #[default]
    Icao,
    Iata,
    Name,
    Category,
    IsoCountry,
    IsoRegion,
    Municipality,
    Elevation,
}

impl OrderField {
    fn column(&self) -> &'static str {
        match self {
            OrderField::Icao => "icao",
            OrderField::Iata => "iata",
            OrderField::Name => "name",
            OrderField::Category => "category",
            OrderField::IsoCountry => "iso_country",
            OrderField::IsoRegion => "iso_region",
            OrderField::Municipality => "municipality",
            OrderField::Elevation => "elevation_ft",
        }
    }
}

impl FromStr for OrderField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "icao" => Ok(OrderField::Icao),
            "iata" => Ok(OrderField::Iata),
            "name" => Ok(OrderField::Name),
            "category" | "type" => Ok(OrderField::Category),
            "iso_country" => Ok(OrderField::IsoCountry),
            "iso_region" => Ok(OrderField::IsoRegion),
            "municipality" => Ok(OrderField::Municipality),
            "elevation_ft" | "elevation" => Ok(OrderField::Elevation),
            other => Err(format!("unknown order field '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

/// A validated airport search.
#[derive(Debug, Clone, Default)]
pub struct AirportFilter {
    pub icaos: Vec<String>,
    pub iatas: Vec<String>,
    pub locals: Vec<String>,
    pub names: Vec<String>,
    pub categories: Vec<AirportCategory>,
    pub iso_countries: Vec<String>,
    pub iso_regions: Vec<String>,
    pub municipalities: Vec<String>,
    pub name: Option<String>,
    pub bounds: Option<Bounds>,
    pub has_metar: bool,
    pub order_field: OrderField,
    pub order_by: SortDirection,
    pub page: u32,
    pub limit: u32,
}

impl AirportFilter {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

fn push_in_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, values: &'a [String]) {
    if values.is_empty() {
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.as_str());
    }
    separated.push_unseparated(")");
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a AirportFilter) {
    qb.push(" WHERE 1 = 1");
    push_in_list(qb, "icao", &filter.icaos);
    push_in_list(qb, "iata", &filter.iatas);
    push_in_list(qb, "local_code", &filter.locals);
    push_in_list(qb, "name", &filter.names);
    push_in_list(qb, "iso_country", &filter.iso_countries);
    push_in_list(qb, "iso_region", &filter.iso_regions);
    push_in_list(qb, "municipality", &filter.municipalities);

    if !filter.categories.is_empty() {
        qb.push(" AND category IN (");
        let mut separated = qb.separated(", ");
        for category in &filter.categories {
            separated.push_bind(category.as_str());
        }
        separated.push_unseparated(")");
    }

    if let Some(name) = &filter.name {
        let pattern = format!("%{}%", name.to_lowercase());
        qb.push(" AND (LOWER(name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(icao) LIKE ")
            .push_bind(pattern)
            .push(")");
    }

    if let Some(bounds) = &filter.bounds {
        qb.push(" AND latitude BETWEEN ")
            .push_bind(bounds.south_west.lat)
            .push(" AND ")
            .push_bind(bounds.north_east.lat);
        if bounds.wraps_antimeridian() {
            qb.push(" AND (longitude >= ")
                .push_bind(bounds.south_west.lon)
                .push(" OR longitude <= ")
                .push_bind(bounds.north_east.lon)
                .push(")");
        } else {
            qb.push(" AND longitude BETWEEN ")
                .push_bind(bounds.south_west.lon)
                .push(" AND ")
                .push_bind(bounds.north_east.lon);
        }
    }

    if filter.has_metar {
        qb.push(" AND icao IN (SELECT station_id FROM metars)");
    }
}

const AIRPORT_COLUMNS: &str = "icao, iata, local_code, name, category, iso_country, iso_region, \
     municipality, elevation_ft, latitude, longitude, has_tower, has_beacon, public";

impl Airport {
    pub async fn get(db: &SqlitePool, icao: &str) -> Result<Option<Airport>, sqlx::Error> {
        let row: Option<AirportRow> = sqlx::query_as(&format!(
            "SELECT {} FROM airports WHERE icao = ?",
            AIRPORT_COLUMNS
        ))
        .bind(icao)
        .fetch_optional(db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut airports = vec![Airport::from(row)];
        attach_children(db, &mut airports).await?;
        Ok(airports.pop())
    }

    pub async fn exists(db: &SqlitePool, icao: &str) -> Result<bool, sqlx::Error> {
        let found: Option<(String,)> = sqlx::query_as("SELECT icao FROM airports WHERE icao = ?")
            .bind(icao)
            .fetch_optional(db)
            .await?;
        Ok(found.is_some())
    }

    /// One page of airports matching the filter, with runways and frequencies.
    pub async fn search(
        db: &SqlitePool,
        filter: &AirportFilter,
    ) -> Result<Vec<Airport>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM airports", AIRPORT_COLUMNS));
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY ")
            .push(filter.order_field.column())
            .push(match filter.order_by {
                SortDirection::Asc => " ASC",
                SortDirection::Desc => " DESC",
            });
        if filter.order_field != OrderField::Icao {
            qb.push(", icao ASC");
        }
        qb.push(" LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows: Vec<AirportRow> = qb.build_query_as().fetch_all(db).await?;
        let mut airports: Vec<Airport> = rows.into_iter().map(Airport::from).collect();
        attach_children(db, &mut airports).await?;
        Ok(airports)
    }

    /// Total number of airports matching the filter, ignoring paging.
    pub async fn count(db: &SqlitePool, filter: &AirportFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM airports");
        push_filters(&mut qb, filter);
        let (total,): (i64,) = qb.build_query_as().fetch_one(db).await?;
        Ok(total)
    }

    pub async fn create(db: &SqlitePool, airport: &Airport) -> Result<Airport, sqlx::Error> {
        let mut tx = db.begin().await?;
        insert_airport(&mut tx, airport, false).await?;
        tx.commit().await?;

        Airport::get(db, &airport.icao)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Bulk import. Existing airports with the same ICAO are overwritten in
    /// place so favorites referencing them survive.
    pub async fn insert_many(db: &SqlitePool, airports: &[Airport]) -> Result<u64, sqlx::Error> {
        let mut tx = db.begin().await?;
        for airport in airports {
            insert_airport(&mut tx, airport, true).await?;
        }
        tx.commit().await?;
        Ok(airports.len() as u64)
    }

    /// Apply a partial update. Returns `None` when the airport does not exist.
    pub async fn update(
        db: &SqlitePool,
        icao: &str,
        changes: UpdateAirport,
    ) -> Result<Option<Airport>, sqlx::Error> {
        let Some(mut airport) = Airport::get(db, icao).await? else {
            return Ok(None);
        };
        let replace_runways = changes.runways.is_some();
        let replace_frequencies = changes.frequencies.is_some();
        changes.apply(&mut airport);

        let now = now_timestamp();
        let mut tx = db.begin().await?;
        sqlx::query(
            r#"
            UPDATE airports SET
                icao = ?, iata = ?, local_code = ?, name = ?, category = ?,
                iso_country = ?, iso_region = ?, municipality = ?, elevation_ft = ?,
                latitude = ?, longitude = ?, has_tower = ?, has_beacon = ?, public = ?,
                updated_at = ?
            WHERE icao = ?
            "#,
        )
        .bind(&airport.icao)
        .bind(&airport.iata)
        .bind(&airport.local)
        .bind(&airport.name)
        .bind(airport.category.as_str())
        .bind(&airport.iso_country)
        .bind(&airport.iso_region)
        .bind(&airport.municipality)
        .bind(airport.elevation_ft)
        .bind(airport.latitude)
        .bind(airport.longitude)
        .bind(airport.has_tower)
        .bind(airport.has_beacon)
        .bind(airport.public)
        .bind(&now)
        .bind(icao)
        .execute(&mut *tx)
        .await?;

        if replace_runways {
            replace_runway_rows(&mut tx, &airport.icao, &airport.runways).await?;
        }
        if replace_frequencies {
            replace_frequency_rows(&mut tx, &airport.icao, &airport.frequencies).await?;
        }
        tx.commit().await?;

        Airport::get(db, &airport.icao).await
    }

    pub async fn delete(db: &SqlitePool, icao: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM airports WHERE icao = ?")
            .bind(icao)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_all(db: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM airports").execute(db).await?;
        Ok(result.rows_affected())
    }

    /// Every stored ICAO code, used by the background METAR refresh.
    pub async fn all_icaos(db: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT icao FROM airports ORDER BY icao")
            .fetch_all(db)
            .await?;
        Ok(rows.into_iter().map(|(icao,)| icao).collect())
    }
}

async fn insert_airport(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    airport: &Airport,
    upsert: bool,
) -> Result<(), sqlx::Error> {
    let now = now_timestamp();
    let mut sql = String::from(
        r#"
        INSERT INTO airports (
            icao, iata, local_code, name, category, iso_country, iso_region,
            municipality, elevation_ft, latitude, longitude, has_tower, has_beacon,
            public, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    );
    if upsert {
        sql.push_str(
            r#"
            ON CONFLICT(icao) DO UPDATE SET
                iata = excluded.iata, local_code = excluded.local_code, name = excluded.name,
                category = excluded.category, iso_country = excluded.iso_country,
                iso_region = excluded.iso_region, municipality = excluded.municipality,
                elevation_ft = excluded.elevation_ft, latitude = excluded.latitude,
                longitude = excluded.longitude, has_tower = excluded.has_tower,
                has_beacon = excluded.has_beacon, public = excluded.public,
                updated_at = excluded.updated_at
            "#,
        );
    }

    sqlx::query(&sql)
        .bind(&airport.icao)
        .bind(&airport.iata)
        .bind(&airport.local)
        .bind(&airport.name)
        .bind(airport.category.as_str())
        .bind(&airport.iso_country)
        .bind(&airport.iso_region)
        .bind(&airport.municipality)
        .bind(airport.elevation_ft)
        .bind(airport.latitude)
        .bind(airport.longitude)
        .bind(airport.has_tower)
        .bind(airport.has_beacon)
        .bind(airport.public)
        .bind(&now)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

    replace_runway_rows(tx, &airport.icao, &airport.runways).await?;
    replace_frequency_rows(tx, &airport.icao, &airport.frequencies).await?;
    Ok(())
}

async fn replace_runway_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    icao: &str,
    runways: &[Runway],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM runways WHERE airport_icao = ?")
        .bind(icao)
        .execute(&mut **tx)
        .await?;
    for runway in runways {
        sqlx::query(
            "INSERT INTO runways (airport_icao, id, length_ft, width_ft, surface) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(icao)
        .bind(&runway.id)
        .bind(runway.length_ft)
        .bind(runway.width_ft)
        .bind(&runway.surface)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn replace_frequency_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    icao: &str,
    frequencies: &[Frequency],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM frequencies WHERE airport_icao = ?")
        .bind(icao)
        .execute(&mut **tx)
        .await?;
    for frequency in frequencies {
        sqlx::query("INSERT INTO frequencies (airport_icao, id, frequency_mhz) VALUES (?, ?, ?)")
            .bind(icao)
            .bind(&frequency.id)
            .bind(frequency.frequency_mhz)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Load runways and frequencies for a batch of airports in two queries.
async fn attach_children(db: &SqlitePool, airports: &mut [Airport]) -> Result<(), sqlx::Error> {
    if airports.is_empty() {
        return Ok(());
    }
    let icaos: Vec<String> = airports.iter().map(|a| a.icao.clone()).collect();

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT airport_icao, id, length_ft, width_ft, surface FROM runways WHERE airport_icao IN (",
    );
    let mut separated = qb.separated(", ");
    for icao in &icaos {
        separated.push_bind(icao.as_str());
    }
    separated.push_unseparated(") ORDER BY airport_icao, id");
    let runway_rows: Vec<RunwayRow> = qb.build_query_as().fetch_all(db).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT airport_icao, id, frequency_mhz FROM frequencies WHERE airport_icao IN (",
    );
    let mut separated = qb.separated(", ");
    for icao in &icaos {
        separated.push_bind(icao.as_str());
    }
    separated.push_unseparated(") ORDER BY airport_icao, id");
    let frequency_rows: Vec<FrequencyRow> = qb.build_query_as().fetch_all(db).await?;

    let mut runways: HashMap<String, Vec<Runway>> = HashMap::new();
    for row in runway_rows {
        runways.entry(row.airport_icao).or_default().push(row.runway);
    }
    let mut frequencies: HashMap<String, Vec<Frequency>> = HashMap::new();
    for row in frequency_rows {
        frequencies
            .entry(row.airport_icao)
            .or_default()
            .push(row.frequency);
    }

    for airport in airports.iter_mut() {
        airport.runways = runways.remove(&airport.icao).unwrap_or_default();
        airport.frequencies = frequencies.remove(&airport.icao).unwrap_or_default();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{sample_airport as sample, test_pool};

    fn filter() -> AirportFilter {
        AirportFilter {
            page: 1,
            limit: 100,
            ..AirportFilter::default()
        }
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&AirportCategory::SeaplaneBase).unwrap();
        assert_eq!(json, "\"seaplane_base\"");

        let parsed: AirportCategory = serde_json::from_str("\"balloon_port\"").unwrap();
        assert_eq!(parsed, AirportCategory::Balloonport);
        let parsed: AirportCategory = serde_json::from_str("\"spaceport\"").unwrap();
        assert_eq!(parsed, AirportCategory::Unknown);
    }

    #[test]
    fn test_airport_json_defaults() {
        let airport: Airport = serde_json::from_str(
            r#"{"icao":"KIAD","name":"Dulles","latitude":38.94,"longitude":-77.45}"#,
        )
        .unwrap();
        assert!(airport.public);
        assert_eq!(airport.category, AirportCategory::Unknown);
        assert!(airport.runways.is_empty());

        let json = serde_json::to_value(&airport).unwrap();
        assert!(json.get("latest_metar").is_none());
        assert!(json.get("iata").is_none());
    }

    #[test]
    fn test_order_field_parse() {
        assert_eq!("NAME".parse::<OrderField>().unwrap(), OrderField::Name);
        assert_eq!("type".parse::<OrderField>().unwrap(), OrderField::Category);
        assert!("latitude; DROP TABLE".parse::<OrderField>().is_err());
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
    }

    #[tokio::test]
    async fn test_create_and_get_with_children() {
        let db = test_pool().await;
        let mut airport = sample("KIAD", 38.9445, -77.4558);
        airport.runways = vec![Runway {
            id: "01L/19R".to_string(),
            length_ft: Some(11500.0),
            width_ft: Some(150.0),
            surface: Some("CON".to_string()),
        }];
        airport.frequencies = vec![Frequency {
            id: "TWR".to_string(),
            frequency_mhz: 120.1,
        }];

        let created = Airport::create(&db, &airport).await.unwrap();
        assert_eq!(created, airport);

        let fetched = Airport::get(&db, "KIAD").await.unwrap().unwrap();
        assert_eq!(fetched.runways.len(), 1);
        assert_eq!(fetched.frequencies[0].frequency_mhz, 120.1);
        assert!(Airport::get(&db, "KXXX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let db = test_pool().await;
        let airport = sample("KIAD", 38.9, -77.4);
        Airport::create(&db, &airport).await.unwrap();
        let err = Airport::create(&db, &airport).await.unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[tokio::test]
    async fn test_search_filters_and_paging() {
        let db = test_pool().await;
        let mut large = sample("KJFK", 40.64, -73.78);
        large.category = AirportCategory::LargeAirport;
        large.name = "John F Kennedy Intl".to_string();
        Airport::insert_many(
            &db,
            &[
                sample("KIAD", 38.94, -77.45),
                sample("KDCA", 38.85, -77.04),
                large,
                sample("EGLL", 51.47, -0.45),
            ],
        )
        .await
        .unwrap();

        let all = Airport::search(&db, &filter()).await.unwrap();
        assert_eq!(
            all.iter().map(|a| a.icao.as_str()).collect::<Vec<_>>(),
            vec!["EGLL", "KDCA", "KIAD", "KJFK"]
        );

        let mut by_icao = filter();
        by_icao.icaos = vec!["KIAD".to_string(), "EGLL".to_string()];
        assert_eq!(Airport::count(&db, &by_icao).await.unwrap(), 2);

        let mut by_category = filter();
        by_category.categories = vec![AirportCategory::LargeAirport];
        let found = Airport::search(&db, &by_category).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].icao, "KJFK");

        let mut by_name = filter();
        by_name.name = Some("kennedy".to_string());
        assert_eq!(Airport::count(&db, &by_name).await.unwrap(), 1);

        let mut in_box = filter();
        in_box.bounds = Some(Bounds::parse("39.5,-76.5,38.5,-78.0").unwrap());
        let found = Airport::search(&db, &in_box).await.unwrap();
        assert_eq!(found.len(), 2);

        let mut paged = filter();
        paged.limit = 3;
        paged.page = 2;
        paged.order_by = SortDirection::Desc;
        let found = Airport::search(&db, &paged).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].icao, "EGLL");
        assert_eq!(Airport::count(&db, &paged).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_search_across_antimeridian() {
        let db = test_pool().await;
        Airport::insert_many(
            &db,
            &[
                sample("NFFN", -17.75, 177.44),
                sample("NSTU", -14.33, -170.71),
                sample("YSSY", -33.94, 151.17),
            ],
        )
        .await
        .unwrap();

        let mut across = filter();
        across.bounds = Some(Bounds::parse("-10,-165,-20,175").unwrap());
        let found = Airport::search(&db, &across).await.unwrap();
        let icaos: Vec<_> = found.iter().map(|a| a.icao.as_str()).collect();
        assert_eq!(icaos, vec!["NFFN", "NSTU"]);
    }

    #[tokio::test]
    async fn test_insert_many_upserts() {
        let db = test_pool().await;
        Airport::insert_many(&db, &[sample("KIAD", 38.9, -77.4)]).await.unwrap();

        let mut renamed = sample("KIAD", 38.9, -77.4);
        renamed.name = "Washington Dulles".to_string();
        Airport::insert_many(&db, &[renamed]).await.unwrap();

        let fetched = Airport::get(&db, "KIAD").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Washington Dulles");
        assert_eq!(Airport::all_icaos(&db).await.unwrap(), vec!["KIAD"]);
    }

    #[tokio::test]
    async fn test_update_partial_and_rename() {
        let db = test_pool().await;
        let mut airport = sample("KIAD", 38.9, -77.4);
        airport.runways = vec![Runway {
            id: "12/30".to_string(),
            length_ft: Some(10501.0),
            width_ft: Some(150.0),
            surface: None,
        }];
        Airport::create(&db, &airport).await.unwrap();

        let updated = Airport::update(
            &db,
            "KIAD",
            UpdateAirport {
                name: Some("Dulles International".to_string()),
                has_tower: Some(true),
                ..UpdateAirport::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.name, "Dulles International");
        assert_eq!(updated.has_tower, Some(true));
        assert_eq!(updated.runways.len(), 1);

        let renamed = Airport::update(
            &db,
            "KIAD",
            UpdateAirport {
                icao: Some("KIAX".to_string()),
                runways: Some(Vec::new()),
                ..UpdateAirport::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(renamed.icao, "KIAX");
        assert!(renamed.runways.is_empty());
        assert!(Airport::get(&db, "KIAD").await.unwrap().is_none());

        let missing = Airport::update(&db, "KZZZ", UpdateAirport::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let db = test_pool().await;
        Airport::insert_many(&db, &[sample("KIAD", 38.9, -77.4), sample("KDCA", 38.8, -77.0)])
            .await
            .unwrap();

        assert!(Airport::delete(&db, "KIAD").await.unwrap());
        assert!(!Airport::delete(&db, "KIAD").await.unwrap());
        assert_eq!(Airport::delete_all(&db).await.unwrap(), 1);
        assert_eq!(Airport::count(&db, &filter()).await.unwrap(), 0);
    }
}
