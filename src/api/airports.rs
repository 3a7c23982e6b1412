use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::ApiError;
use super::validation::{normalize_airport, normalize_update};
use crate::db::{
    split_list, Airport, AirportCategory, AirportFilter, AirportQuery, DataResponse, OrderField,
    PageMeta, PagedResponse, SortDirection, UpdateAirport,
};
use crate::geo::Bounds;
use crate::AppState;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct AirportDetailQuery {
    pub metars: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported: u64,
}

fn upper_list(value: Option<&str>) -> Vec<String> {
    split_list(value)
        .into_iter()
        .map(|v| v.to_uppercase())
        .collect()
}

/// Turn the raw query string into a validated search.
pub fn resolve_filter(query: &AirportQuery) -> Result<AirportFilter, ApiError> {
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::validation_field("page", "Page numbers start at 1"));
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let bounds = query
        .bounds
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .map(Bounds::parse)
        .transpose()?;

    let order_field = match query.order_field.as_deref() {
        Some(field) => field
            .parse::<OrderField>()
            .map_err(|e| ApiError::validation_field("order_field", e))?,
        None => OrderField::default(),
    };
    let order_by = match query.order_by.as_deref() {
        Some(direction) => direction
            .parse::<SortDirection>()
            .map_err(|e| ApiError::validation_field("order_by", e))?,
        None => SortDirection::default(),
    };

    Ok(AirportFilter {
        icaos: upper_list(query.icaos.as_deref()),
        iatas: upper_list(query.iatas.as_deref()),
        locals: upper_list(query.locals.as_deref()),
        names: split_list(query.names.as_deref()),
        categories: split_list(query.categories.as_deref())
            .into_iter()
            .map(AirportCategory::from)
            .collect(),
        iso_countries: upper_list(query.iso_countries.as_deref()),
        iso_regions: upper_list(query.iso_regions.as_deref()),
        municipalities: split_list(query.municipalities.as_deref()),
        name: query
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        bounds,
        has_metar: query.has_metar.unwrap_or(false),
        order_field,
        order_by,
        page,
        limit,
    })
}

/// Attach the latest METAR to each airport that has one.
async fn embed_metars(state: &AppState, airports: &mut [Airport]) -> Result<(), ApiError> {
    if airports.is_empty() {
        return Ok(());
    }
    let icaos: Vec<&str> = airports.iter().map(|a| a.icao.as_str()).collect();
    let mut metars: HashMap<String, _> = state
        .metars
        .latest(&icaos, false)
        .await?
        .into_iter()
        .map(|m| (m.station_id.clone(), m))
        .collect();

    for airport in airports.iter_mut() {
        airport.latest_metar = metars.remove(&airport.icao);
    }
    Ok(())
}

/// GET /airports
pub async fn list_airports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AirportQuery>,
) -> Result<Json<PagedResponse<Airport>>, ApiError> {
    let filter = resolve_filter(&query)?;

    let mut airports = Airport::search(&state.db, &filter).await?;
    let total = Airport::count(&state.db, &filter).await?;
    if query.metars.unwrap_or(false) {
        embed_metars(&state, &mut airports).await?;
    }

    Ok(Json(PagedResponse {
        data: airports,
        meta: PageMeta {
            limit: filter.limit,
            page: filter.page,
            total,
        },
    }))
}

/// GET /airports/:icao
pub async fn get_airport(
    State(state): State<Arc<AppState>>,
    Path(icao): Path<String>,
    Query(query): Query<AirportDetailQuery>,
) -> Result<Json<DataResponse<Airport>>, ApiError> {
    let icao = icao.trim().to_uppercase();
    let mut airport = Airport::get(&state.db, &icao)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Airport {} not found", icao)))?;

    if query.metars.unwrap_or(false) {
        embed_metars(&state, std::slice::from_mut(&mut airport)).await?;
    }
    Ok(Json(DataResponse::new(airport)))
}

/// POST /airports
pub async fn create_airport(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(mut airport): Json<Airport>,
) -> Result<(StatusCode, Json<DataResponse<Airport>>), ApiError> {
    normalize_airport(&mut airport)?;
    airport.latest_metar = None;

    if Airport::exists(&state.db, &airport.icao).await? {
        return Err(ApiError::conflict(format!(
            "Airport {} already exists",
            airport.icao
        )));
    }

    let created = Airport::create(&state.db, &airport).await?;
    tracing::info!(icao = %created.icao, user_id = %admin.user.id, "Created airport");
    Ok((StatusCode::CREATED, Json(DataResponse::new(created))))
}

/// PUT /airports/:icao
pub async fn update_airport(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(icao): Path<String>,
    Json(mut changes): Json<UpdateAirport>,
) -> Result<Json<DataResponse<Airport>>, ApiError> {
    let icao = icao.trim().to_uppercase();
    normalize_update(&mut changes)?;

    let updated = Airport::update(&state.db, &icao, changes)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Airport {} not found", icao)))?;

    tracing::info!(icao = %icao, new_icao = %updated.icao, user_id = %admin.user.id, "Updated airport");
    Ok(Json(DataResponse::new(updated)))
}

/// DELETE /airports/:icao
pub async fn delete_airport(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(icao): Path<String>,
) -> Result<StatusCode, ApiError> {
    let icao = icao.trim().to_uppercase();
    if !Airport::delete(&state.db, &icao).await? {
        return Err(ApiError::not_found(format!("Airport {} not found", icao)));
    }
    tracing::info!(icao = %icao, user_id = %admin.user.id, "Deleted airport");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /airports
pub async fn delete_all_airports(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> Result<StatusCode, ApiError> {
    let deleted = Airport::delete_all(&state.db).await?;
    tracing::warn!(deleted, user_id = %admin.user.id, "Deleted all airports");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_airports(bytes: &[u8], source: &str) -> Result<Vec<Airport>, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| {
        ApiError::validation_field(source, format!("Expected a JSON array of airports: {}", e))
    })
}

/// POST /airports/import
///
/// Accepts either a JSON array body or a multipart upload whose file fields
/// each hold a JSON array.
pub async fn import_airports(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    request: Request,
) -> Result<Json<DataResponse<ImportResult>>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let mut airports = Vec::new();
    if is_multipart {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let name = field
                .file_name()
                .or(field.name())
                .unwrap_or("file")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            airports.extend(parse_airports(&bytes, &name)?);
        }
    } else {
        let bytes = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        airports = parse_airports(&bytes, "body")?;
    }

    for (index, airport) in airports.iter_mut().enumerate() {
        airport.latest_metar = None;
        normalize_airport(airport).map_err(|e| {
            ApiError::validation_field(&format!("airports[{}]", index), e.message())
        })?;
    }

    let imported = Airport::insert_many(&state.db, &airports).await?;
    tracing::info!(imported, user_id = %admin.user.id, "Imported airports");
    Ok(Json(DataResponse::new(ImportResult { imported })))
}
