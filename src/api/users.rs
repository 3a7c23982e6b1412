//! Per-user favorites and profile pictures.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use std::path::PathBuf;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use super::validation::picture_extension;
use crate::db::{Airport, DataResponse, Favorite, User, UserResponse};
use crate::AppState;

pub const MAX_PICTURE_BYTES: usize = 5 * 1024 * 1024;

fn picture_dir(state: &AppState, user_id: &str) -> PathBuf {
    state
        .config
        .server
        .data_dir
        .join("pictures")
        .join(user_id)
}

/// GET /users/favorites
pub async fn list_favorites(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<DataResponse<Vec<String>>>, ApiError> {
    let favorites = Favorite::list(&state.db, &auth.user.id).await?;
    Ok(Json(DataResponse::new(favorites)))
}

/// POST /users/favorites/:icao
pub async fn add_favorite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(icao): Path<String>,
) -> Result<Json<DataResponse<Vec<String>>>, ApiError> {
    let icao = icao.trim().to_uppercase();
    if !Airport::exists(&state.db, &icao).await? {
        return Err(ApiError::not_found(format!("Airport {} not found", icao)));
    }
    if !Favorite::add(&state.db, &auth.user.id, &icao).await? {
        return Err(ApiError::conflict(format!(
            "Airport {} is already a favorite",
            icao
        )));
    }

    let favorites = Favorite::list(&state.db, &auth.user.id).await?;
    Ok(Json(DataResponse::new(favorites)))
}

/// DELETE /users/favorites/:icao
pub async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(icao): Path<String>,
) -> Result<Json<DataResponse<Vec<String>>>, ApiError> {
    let icao = icao.trim().to_uppercase();
    if !Favorite::remove(&state.db, &auth.user.id, &icao).await? {
        return Err(ApiError::conflict(format!("Airport {} is not a favorite", icao)));
    }

    let favorites = Favorite::list(&state.db, &auth.user.id).await?;
    Ok(Json(DataResponse::new(favorites)))
}

/// POST /users/picture
///
/// The first file field of the multipart body replaces any existing picture.
pub async fn upload_picture(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<DataResponse<UserResponse>>, ApiError> {
    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let extension = picture_extension(&file_name)
            .map_err(ApiError::unsupported_media_type)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((extension, bytes));
        break;
    }

    let (extension, bytes) =
        upload.ok_or_else(|| ApiError::validation_field("picture", "A picture file is required"))?;
    if bytes.is_empty() {
        return Err(ApiError::validation_field("picture", "Picture file is empty"));
    }
    if bytes.len() > MAX_PICTURE_BYTES {
        return Err(ApiError::payload_too_large(format!(
            "Picture exceeds the {} MiB limit",
            MAX_PICTURE_BYTES / (1024 * 1024)
        )));
    }

    let dir = picture_dir(&state, &auth.user.id);
    if tokio::fs::try_exists(&dir).await? {
        tokio::fs::remove_dir_all(&dir).await?;
    }
    tokio::fs::create_dir_all(&dir).await?;

    let file_name = format!("picture.{}", extension);
    tokio::fs::write(dir.join(&file_name), &bytes).await?;
    User::set_picture(&state.db, &auth.user.id, Some(&file_name)).await?;

    tracing::info!(user_id = %auth.user.id, size = bytes.len(), "Stored profile picture");
    let user = User::get_by_id(&state.db, &auth.user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(DataResponse::new(UserResponse::from(user))))
}

/// GET /users/picture
pub async fn get_picture(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = auth
        .user
        .profile_picture
        .as_deref()
        .ok_or_else(|| ApiError::not_found("No profile picture"))?;

    let path = picture_dir(&state, &auth.user.id).join(file_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(user_id = %auth.user.id, path = %path.display(), "Profile picture file is missing");
            return Err(ApiError::not_found("No profile picture"));
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// DELETE /users/picture
pub async fn delete_picture(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<DataResponse<UserResponse>>, ApiError> {
    if auth.user.profile_picture.is_none() {
        return Err(ApiError::not_found("No profile picture"));
    }

    let dir = picture_dir(&state, &auth.user.id);
    if tokio::fs::try_exists(&dir).await? {
        tokio::fs::remove_dir_all(&dir).await?;
    }
    User::set_picture(&state.db, &auth.user.id, None).await?;

    let mut user = auth.user;
    user.profile_picture = None;
    Ok(Json(DataResponse::new(UserResponse::from(user))))
}
