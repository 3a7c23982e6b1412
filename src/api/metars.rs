use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::validate_icao;
use crate::db::{split_list, DataResponse};
use crate::weather::Metar;
use crate::AppState;

/// Upper bound on stations per request
pub const MAX_STATIONS: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct MetarQuery {
    pub icaos: Option<String>,
    /// Bypass the negative cache
    pub force: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    pub force: Option<bool>,
}

fn parse_station_list(raw: Option<&str>) -> Result<Vec<String>, ApiError> {
    let icaos: Vec<String> = split_list(raw)
        .into_iter()
        .map(|icao| icao.to_uppercase())
        .collect();
    if icaos.is_empty() {
        return Err(ApiError::unprocessable("The icaos parameter is required"));
    }
    if icaos.len() > MAX_STATIONS {
        return Err(ApiError::validation_field(
            "icaos",
            format!("At most {} stations per request", MAX_STATIONS),
        ));
    }

    let mut errors = ValidationErrorBuilder::new();
    for icao in &icaos {
        if let Err(message) = validate_icao(icao) {
            errors.add("icaos", format!("{}: {}", icao, message));
        }
    }
    errors.finish()?;
    Ok(icaos)
}

async fn latest(state: &AppState, icaos: &[String], force: bool) -> Result<Vec<Metar>, ApiError> {
    Ok(state.metars.latest(icaos, force).await?)
}

/// GET /metars?icaos=KIAD,KDCA
pub async fn list_metars(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetarQuery>,
) -> Result<Json<DataResponse<Vec<Metar>>>, ApiError> {
    let icaos = parse_station_list(query.icaos.as_deref())?;
    let metars = latest(&state, &icaos, query.force.unwrap_or(false)).await?;
    Ok(Json(DataResponse::new(metars)))
}

/// GET /metars/:icaos
pub async fn get_metars(
    State(state): State<Arc<AppState>>,
    Path(icaos): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Result<Json<DataResponse<Vec<Metar>>>, ApiError> {
    let icaos = parse_station_list(Some(&icaos))?;
    let metars = latest(&state, &icaos, query.force.unwrap_or(false)).await?;
    Ok(Json(DataResponse::new(metars)))
}
