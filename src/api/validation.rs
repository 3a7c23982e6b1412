//! Input validation for API requests.
//!
//! Field validators return `Err(message)`; collect them into an `ApiError`
//! with `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{Airport, UpdateAirport};

lazy_static! {
    /// ICAO location indicators, plus the 3 character local codes some datasets use
    static ref ICAO_REGEX: Regex = Regex::new(r"^[A-Z0-9]{3,4}$").unwrap();

    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Image extensions accepted for profile pictures
pub const PICTURE_EXTENSIONS: &[&str] = &[
    "apng", "avif", "gif", "jpg", "jpeg", "jfif", "pjpeg", "pjp", "png", "svg", "webp",
];

/// Expects an already uppercased code.
pub fn validate_icao(icao: &str) -> Result<(), String> {
    if icao.is_empty() {
        return Err("ICAO code is required".to_string());
    }
    if !ICAO_REGEX.is_match(icao) {
        return Err("ICAO code must be 3 or 4 letters or digits".to_string());
    }
    Ok(())
}

pub fn validate_latitude(latitude: f64) -> Result<(), String> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err("Latitude must be between -90 and 90".to_string());
    }
    Ok(())
}

pub fn validate_longitude(longitude: f64) -> Result<(), String> {
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err("Longitude must be between -180 and 180".to_string());
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }
    if name.len() > 255 {
        return Err("Name is too long (max 255 characters)".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Lowercased extension of an acceptable picture file name.
pub fn picture_extension(file_name: &str) -> Result<String, String> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| "Picture file name has no extension".to_string())?;

    if PICTURE_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(format!(
            "Unsupported picture type '{}'. Allowed: {}",
            extension,
            PICTURE_EXTENSIONS.join(", ")
        ))
    }
}

/// Uppercase codes and validate a new airport.
pub fn normalize_airport(airport: &mut Airport) -> Result<(), ApiError> {
    airport.icao = airport.icao.trim().to_uppercase();
    airport.iata = airport.iata.take().map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty());

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("icao", validate_icao(&airport.icao))
        .check("name", validate_name(&airport.name))
        .check("latitude", validate_latitude(airport.latitude))
        .check("longitude", validate_longitude(airport.longitude));
    errors.finish()
}

/// Uppercase codes and validate only the fields being changed.
pub fn normalize_update(update: &mut UpdateAirport) -> Result<(), ApiError> {
    update.icao = update.icao.take().map(|c| c.trim().to_uppercase());
    update.iata = update.iata.take().map(|c| c.trim().to_uppercase());

    let mut errors = ValidationErrorBuilder::new();
    if let Some(icao) = &update.icao {
        errors.check("icao", validate_icao(icao));
    }
    if let Some(name) = &update.name {
        errors.check("name", validate_name(name));
    }
    if let Some(latitude) = update.latitude {
        errors.check("latitude", validate_latitude(latitude));
    }
    if let Some(longitude) = update.longitude {
        errors.check("longitude", validate_longitude(longitude));
    }
    errors.finish()
}
