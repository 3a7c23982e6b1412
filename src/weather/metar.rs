//! METAR decoding.
//!
//! A report is split on whitespace and consumed group by group. Each
//! `take_*` method inspects the head of the remaining tokens and advances past
//! the groups it recognizes. Tokens nothing recognizes are logged and skipped,
//! so a single odd group never discards the rest of an observation.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::flight_category::FlightCategory;

const MPS_TO_KT: f64 = 1.94384;
const METERS_TO_STATUTE_MILES: f64 = 0.000621371;

lazy_static! {
    static ref WIND: Regex =
        Regex::new(r"^(\d{3}|VRB)(\d{2,3})(?:G(\d{2,3}))?(KT|MPS)$").unwrap();
    /// Wind with the unit split off into its own token (`21016 KT`)
    static ref WIND_NO_UNIT: Regex = Regex::new(r"^(?:\d{3}|VRB)\d{2,3}(?:G\d{2,3})?$").unwrap();
    static ref VARIABLE_WIND: Regex = Regex::new(r"^\d{3}V\d{3}$").unwrap();

    static ref VISIBILITY_SM: Regex = Regex::new(r"^([MP])?(\d+)(?:/(\d+))?SM$").unwrap();
    static ref WHOLE_NUMBER: Regex = Regex::new(r"^\d+$").unwrap();
    static ref VISIBILITY_METRIC: Regex =
        Regex::new(r"^(\d{4})(?:N|NE|NW|S|SE|SW|E|W|NDV)?$").unwrap();

    static ref RVR: Regex =
        Regex::new(r"^R(\d{1,3}[LRC]?)/([PM]?\d{4})(?:V([PM]?\d{4}))?(?:FT)?[UDN]?$").unwrap();

    static ref WEATHER: Regex = Regex::new(
        r"^(?:[+-]|VC)?(?:MI|PR|BC|DR|BL|SH|TS|FZ)?(?:DZ|RA|SN|SG|IC|PL|GR|GS|UP|BR|FG|FU|VA|DU|SA|HZ|PY|PO|SQ|FC|SS|DS)*$"
    ).unwrap();

    static ref SKY_CLEAR: Regex = Regex::new(r"^(CLR|SKC|NSC|NCD)$").unwrap();
    static ref SKY_LAYER: Regex =
        Regex::new(r"^(FEW|SCT|BKN|OVC)(\d{3}|///)?(CB|TCU|///)?$").unwrap();
    static ref VERTICAL_VISIBILITY: Regex = Regex::new(r"^VV(\d{3}|///)$").unwrap();

    static ref TEMPERATURE: Regex = Regex::new(r"^(M?\d{2})?/(M?\d{2})?$").unwrap();
    static ref ALTIMETER_INHG: Regex = Regex::new(r"^A(\d{4})$").unwrap();
    static ref ALTIMETER_HPA: Regex = Regex::new(r"^Q(\d{4})$").unwrap();

    static ref PEAK_WIND: Regex =
        Regex::new(r"^(?P<degrees>\d{3})(?P<speed>\d{2,3})/(?P<hour>\d{2})?(?P<minutes>\d{2})$")
            .unwrap();
    static ref SEA_LEVEL_PRESSURE: Regex = Regex::new(r"^SLP(\d{3})$").unwrap();
    static ref PRECISE_TEMPERATURE: Regex = Regex::new(r"^T([01])(\d{3})([01])(\d{3})$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetarParseError {
    #[error("Unable to parse empty METAR data")]
    Empty,
    #[error("METAR has too few groups to contain a station and observation time: {0}")]
    TooShort(String),
    #[error("Unable to parse observation time '{time}' in: {raw}")]
    ObservationTime { time: String, raw: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metar {
    pub station_id: String,
    pub raw_text: String,
    pub observation_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dewpoint_c: Option<f64>,
    /// Degrees as reported (`"210"`) or `"VRB"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_dir_degrees: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_kt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_gust_kt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_wind_dir_degrees: Option<String>,
    /// Statute miles, possibly qualified: `"M0.25"` (less than), `"P10"` (more than)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_statute_mi: Option<String>,
    #[serde(default)]
    pub runway_visual_range: Vec<RunwayVisualRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altim_in_hg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sea_level_pressure_mb: Option<f64>,
    #[serde(default)]
    pub remarks: Remarks,
    #[serde(default)]
    pub weather_phenomena: Vec<String>,
    #[serde(default)]
    pub sky_condition: Vec<SkyCondition>,
    #[serde(default)]
    pub flight_category: FlightCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunwayVisualRange {
    pub runway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_ft: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_visibility_low_ft: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_visibility_high_ft: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkyCondition {
    pub sky_cover: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_base_ft_agl: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significant_convective_clouds: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakWind {
    pub degrees: i32,
    pub speed: i32,
    pub hour: Option<i32>,
    pub minutes: i32,
}

/// Report modifiers and decoded `RMK` section flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Remarks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_wind: Option<PeakWind>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub corrected: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_significant_change: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub temporary_change: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_station_without_precipitation: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_station_with_precipitation: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub maintenance_indicator_on: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub rvr_missing: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub precipitation_identifier_information_not_available: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub precipitation_information_not_available: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub freezing_rain_information_not_available: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub thunderstorm_information_not_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_at_secondary_location_not_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sky_condition_at_secondary_location_not_available: Option<String>,
}

type Tokens<'a, 'b> = &'b mut &'a [&'a str];

fn advance<'a>(tokens: &mut &'a [&'a str], n: usize) {
    let rest: &'a [&'a str] = *tokens;
    *tokens = &rest[n.min(rest.len())..];
}

impl Metar {
    fn empty(station_id: String, raw_text: String, observation_time: DateTime<Utc>) -> Self {
        Self {
            station_id,
            raw_text,
            observation_time,
            temp_c: None,
            dewpoint_c: None,
            wind_dir_degrees: None,
            wind_speed_kt: None,
            wind_gust_kt: None,
            variable_wind_dir_degrees: None,
            visibility_statute_mi: None,
            runway_visual_range: Vec::new(),
            altim_in_hg: None,
            sea_level_pressure_mb: None,
            remarks: Remarks::default(),
            weather_phenomena: Vec::new(),
            sky_condition: Vec::new(),
            flight_category: FlightCategory::Unkn,
            humidity: None,
        }
    }

    /// Decode a single report. `reference_time` supplies the month and year
    /// that the `DDHHMMZ` group leaves out.
    pub fn parse(raw: &str, reference_time: DateTime<Utc>) -> Result<Self, MetarParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MetarParseError::Empty);
        }

        let all: Vec<&str> = raw.split_whitespace().collect();
        let mut tokens: &[&str] = &all;
        if matches!(tokens.first(), Some(&"METAR") | Some(&"SPECI")) {
            advance(&mut tokens, 1);
        }
        if tokens.len() < 3 {
            return Err(MetarParseError::TooShort(raw.to_string()));
        }

        let station_id = tokens[0].to_uppercase();
        let observation_time = resolve_observation_time(tokens[1], reference_time).ok_or_else(
            || MetarParseError::ObservationTime {
                time: tokens[1].to_string(),
                raw: raw.to_string(),
            },
        )?;
        advance(&mut tokens, 2);

        let mut metar = Metar::empty(station_id, raw.to_string(), observation_time);

        while let Some(&token) = tokens.first() {
            if token == "RMK" {
                advance(&mut tokens, 1);
                metar.take_remarks(&mut tokens);
                break;
            }
            if token == "TEMPO" || token == "BECMG" {
                // Trend groups describe forecast conditions, not the observation.
                metar.remarks.temporary_change |= token == "TEMPO";
                while tokens.first().is_some_and(|t| *t != "RMK") {
                    advance(&mut tokens, 1);
                }
                continue;
            }

            let recognized = metar.take_modifier(&mut tokens)
                || metar.take_wind(&mut tokens)
                || metar.take_variable_wind(&mut tokens)
                || metar.take_visibility(&mut tokens)
                || metar.take_runway_visual_range(&mut tokens)
                || metar.take_weather(&mut tokens)
                || metar.take_sky(&mut tokens)
                || metar.take_temperature(&mut tokens)
                || metar.take_pressure(&mut tokens);

            if !recognized {
                tracing::debug!(
                    station = %metar.station_id,
                    token = token,
                    "Skipping unexpected METAR group"
                );
                advance(&mut tokens, 1);
            }
        }

        metar.flight_category =
            FlightCategory::classify(metar.visibility_statute_mi.as_deref(), &metar.sky_condition);
        metar.humidity = match (metar.temp_c, metar.dewpoint_c) {
            (Some(t), Some(td)) => Some(estimate_humidity(t, td)),
            _ => None,
        };

        Ok(metar)
    }

    fn take_modifier(&mut self, tokens: Tokens<'_, '_>) -> bool {
        match tokens.first() {
            Some(&"AUTO") => self.remarks.auto = true,
            Some(&"COR") => self.remarks.corrected = true,
            Some(&"NOSIG") => self.remarks.no_significant_change = true,
            Some(&"NIL") => {}
            _ => return false,
        }
        advance(tokens, 1);
        true
    }

    fn take_wind(&mut self, tokens: Tokens<'_, '_>) -> bool {
        let (group, consumed) = match tokens {
            [head, unit, ..] if (*unit == "KT" || *unit == "MPS") && WIND_NO_UNIT.is_match(head) => {
                (format!("{}{}", head, unit), 2)
            }
            [head, ..] if WIND.is_match(head) => (head.to_string(), 1),
            _ => return false,
        };

        let Some(caps) = WIND.captures(&group) else {
            return false;
        };
        let factor = if &caps[4] == "MPS" { MPS_TO_KT } else { 1.0 };
        let to_kt = |v: &str| v.parse::<f64>().ok().map(|v| round_tenths(v * factor));

        self.wind_dir_degrees = Some(caps[1].to_string());
        self.wind_speed_kt = to_kt(&caps[2]);
        self.wind_gust_kt = caps.get(3).and_then(|g| to_kt(g.as_str()));
        advance(tokens, consumed);
        true
    }

    fn take_variable_wind(&mut self, tokens: Tokens<'_, '_>) -> bool {
        match tokens.first() {
            Some(head) if VARIABLE_WIND.is_match(head) => {
                self.variable_wind_dir_degrees = Some(head.to_string());
                advance(tokens, 1);
                true
            }
            _ => false,
        }
    }

    fn take_visibility(&mut self, tokens: Tokens<'_, '_>) -> bool {
        // Whole number followed by a fraction: `1 1/2SM`
        if let &[whole, fraction, ..] = &**tokens {
            if WHOLE_NUMBER.is_match(whole) {
                if let Some((qualifier, miles)) = statute_miles(fraction) {
                    if fraction.contains('/') {
                        let whole: f64 = whole.parse().unwrap_or(0.0);
                        self.visibility_statute_mi =
                            Some(format!("{}{}", qualifier, format_miles(whole + miles)));
                        advance(tokens, 2);
                        return true;
                    }
                }
            }
        }

        let Some(&head) = tokens.first() else {
            return false;
        };

        if let Some((qualifier, miles)) = statute_miles(head) {
            self.visibility_statute_mi = Some(format!("{}{}", qualifier, format_miles(miles)));
            advance(tokens, 1);
            return true;
        }

        if let Some(caps) = VISIBILITY_METRIC.captures(head) {
            let meters = &caps[1];
            self.visibility_statute_mi = Some(if meters == "9999" {
                "P10".to_string()
            } else {
                let meters: f64 = meters.parse().unwrap_or(0.0);
                format!("{:.2}", meters * METERS_TO_STATUTE_MILES)
            });
            advance(tokens, 1);
            return true;
        }

        false
    }

    fn take_runway_visual_range(&mut self, tokens: Tokens<'_, '_>) -> bool {
        let mut found = false;
        while let Some(caps) = tokens.first().and_then(|head| RVR.captures(head)) {
            let range = match caps.get(3) {
                Some(high) => RunwayVisualRange {
                    runway: caps[1].to_string(),
                    visibility_ft: None,
                    variable_visibility_low_ft: Some(caps[2].to_string()),
                    variable_visibility_high_ft: Some(high.as_str().to_string()),
                },
                None => RunwayVisualRange {
                    runway: caps[1].to_string(),
                    visibility_ft: Some(caps[2].to_string()),
                    ..Default::default()
                },
            };
            self.runway_visual_range.push(range);
            advance(tokens, 1);
            found = true;
        }
        found
    }

    fn take_weather(&mut self, tokens: Tokens<'_, '_>) -> bool {
        let mut found = false;
        while let Some(&head) = tokens.first() {
            let body = head
                .strip_prefix(|c| c == '+' || c == '-')
                .or_else(|| head.strip_prefix("VC"))
                .unwrap_or(head);
            if body.is_empty() || !WEATHER.is_match(head) {
                break;
            }
            self.weather_phenomena.push(head.to_string());
            advance(tokens, 1);
            found = true;
        }
        found
    }

    fn take_sky(&mut self, tokens: Tokens<'_, '_>) -> bool {
        let mut found = false;
        while let Some(&head) = tokens.first() {
            let layer = if head == "CAVOK" {
                if self.visibility_statute_mi.is_none() {
                    self.visibility_statute_mi = Some("P10".to_string());
                }
                SkyCondition {
                    sky_cover: "CLR".to_string(),
                    ..Default::default()
                }
            } else if SKY_CLEAR.is_match(head) {
                SkyCondition {
                    sky_cover: head.to_string(),
                    ..Default::default()
                }
            } else if let Some(caps) = SKY_LAYER.captures(head) {
                SkyCondition {
                    sky_cover: caps[1].to_string(),
                    cloud_base_ft_agl: caps.get(2).and_then(|b| cloud_base(b.as_str())),
                    significant_convective_clouds: caps
                        .get(3)
                        .map(|c| c.as_str())
                        .filter(|c| *c != "///")
                        .map(str::to_string),
                }
            } else if let Some(caps) = VERTICAL_VISIBILITY.captures(head) {
                SkyCondition {
                    sky_cover: "VV".to_string(),
                    cloud_base_ft_agl: cloud_base(&caps[1]),
                    significant_convective_clouds: None,
                }
            } else {
                break;
            };
            self.sky_condition.push(layer);
            advance(tokens, 1);
            found = true;
        }
        found
    }

    fn take_temperature(&mut self, tokens: Tokens<'_, '_>) -> bool {
        let Some(caps) = tokens
            .first()
            .filter(|head| head.len() > 1)
            .and_then(|head| TEMPERATURE.captures(head))
        else {
            return false;
        };
        self.temp_c = caps.get(1).and_then(|t| signed_celsius(t.as_str()));
        self.dewpoint_c = caps.get(2).and_then(|d| signed_celsius(d.as_str()));
        advance(tokens, 1);
        true
    }

    fn take_pressure(&mut self, tokens: Tokens<'_, '_>) -> bool {
        let Some(&head) = tokens.first() else {
            return false;
        };
        if let Some(caps) = ALTIMETER_INHG.captures(head) {
            self.altim_in_hg = caps[1].parse::<f64>().ok().map(|v| v / 100.0);
        } else if let Some(caps) = ALTIMETER_HPA.captures(head) {
            self.sea_level_pressure_mb = caps[1].parse::<f64>().ok();
        } else {
            return false;
        }
        advance(tokens, 1);
        true
    }

    fn take_remarks(&mut self, tokens: Tokens<'_, '_>) {
        while let Some(&remark) = tokens.first() {
            advance(tokens, 1);
            match remark {
                "AO1" => self.remarks.auto_station_without_precipitation = true,
                "AO2" => self.remarks.auto_station_with_precipitation = true,
                "$" => self.remarks.maintenance_indicator_on = true,
                "PNO" => self.remarks.precipitation_information_not_available = true,
                "RVRNO" => self.remarks.rvr_missing = true,
                "PWINO" => self.remarks.precipitation_identifier_information_not_available = true,
                "FZRANO" => self.remarks.freezing_rain_information_not_available = true,
                "TSNO" => self.remarks.thunderstorm_information_not_available = true,
                "PK" if tokens.first() == Some(&"WND") => {
                    advance(tokens, 1);
                    if let Some(&value) = tokens.first() {
                        advance(tokens, 1);
                        self.remarks.peak_wind = parse_peak_wind(value);
                        if self.remarks.peak_wind.is_none() {
                            tracing::debug!(
                                station = %self.station_id,
                                value = value,
                                "Unable to parse peak wind remark"
                            );
                        }
                    }
                }
                "VISNO" => {
                    if let Some(&location) = tokens.first() {
                        self.remarks.visibility_at_secondary_location_not_available =
                            Some(location.to_string());
                        advance(tokens, 1);
                    }
                }
                "CHINO" => {
                    if let Some(&location) = tokens.first() {
                        self.remarks.sky_condition_at_secondary_location_not_available =
                            Some(location.to_string());
                        advance(tokens, 1);
                    }
                }
                _ => {
                    if let Some(caps) = SEA_LEVEL_PRESSURE.captures(remark) {
                        if let Ok(tenths) = caps[1].parse::<f64>() {
                            let base = if tenths > 500.0 { 900.0 } else { 1000.0 };
                            self.sea_level_pressure_mb = Some((base * 10.0 + tenths) / 10.0);
                        }
                    } else if let Some(caps) = PRECISE_TEMPERATURE.captures(remark) {
                        self.temp_c = signed_tenths(&caps[1], &caps[2]).or(self.temp_c);
                        self.dewpoint_c = signed_tenths(&caps[3], &caps[4]).or(self.dewpoint_c);
                    }
                }
            }
        }
    }
}

/// Decode one report per line, dropping (and logging) lines that fail.
pub fn parse_many(text: &str, reference_time: DateTime<Utc>) -> Vec<Metar> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match Metar::parse(line, reference_time) {
            Ok(metar) => Some(metar),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparseable METAR");
                None
            }
        })
        .collect()
}

/// Relative humidity estimate from the temperature/dewpoint spread.
pub fn estimate_humidity(temp_c: f64, dewpoint_c: f64) -> f64 {
    (100.0 - 5.0 * (temp_c - dewpoint_c)).clamp(0.0, 100.0)
}

/// Resolve `DDHHMMZ` against a reference time. A day later than the
/// reference day belongs to the previous month.
fn resolve_observation_time(group: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let digits = group.strip_suffix('Z')?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day: u32 = digits[0..2].parse().ok()?;
    let hour: u32 = digits[2..4].parse().ok()?;
    let minute: u32 = digits[4..6].parse().ok()?;

    let reference_date = reference.date_naive();
    let month_start = NaiveDate::from_ymd_opt(reference_date.year(), reference_date.month(), 1)?;
    let month_start = if day > reference_date.day() {
        month_start.checked_sub_months(Months::new(1))?
    } else {
        month_start
    };

    let date = NaiveDate::from_ymd_opt(month_start.year(), month_start.month(), day)?;
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// `(qualifier, miles)` for a statute mile group such as `10SM`, `M1/4SM`, `P6SM`.
fn statute_miles(token: &str) -> Option<(&'static str, f64)> {
    let caps = VISIBILITY_SM.captures(token)?;
    let qualifier = match caps.get(1).map(|m| m.as_str()) {
        Some("M") => "M",
        Some("P") => "P",
        _ => "",
    };
    let numerator: f64 = caps[2].parse().ok()?;
    let miles = match caps.get(3) {
        Some(denominator) => {
            let denominator: f64 = denominator.as_str().parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => numerator,
    };
    Some((qualifier, miles))
}

fn format_miles(miles: f64) -> String {
    let formatted = format!("{:.4}", miles);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn cloud_base(hundreds: &str) -> Option<i32> {
    hundreds.parse::<i32>().ok().map(|h| h * 100)
}

fn signed_celsius(value: &str) -> Option<f64> {
    match value.strip_prefix('M') {
        Some(v) => v.parse::<f64>().ok().map(|v| -v),
        None => value.parse::<f64>().ok(),
    }
}

fn signed_tenths(sign: &str, tenths: &str) -> Option<f64> {
    let value = tenths.parse::<f64>().ok()? / 10.0;
    Some(if sign == "1" { -value } else { value })
}

fn parse_peak_wind(value: &str) -> Option<PeakWind> {
    let caps = PEAK_WIND.captures(value)?;
    Some(PeakWind {
        degrees: caps["degrees"].parse().ok()?,
        speed: caps["speed"].parse().ok()?,
        hour: caps.name("hour").and_then(|h| h.as_str().parse().ok()),
        minutes: caps["minutes"].parse().ok()?,
    })
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn parse(raw: &str) -> Metar {
        Metar::parse(raw, reference()).unwrap()
    }

    #[test]
    fn test_full_us_report() {
        let metar = parse(
            "METAR KABC 121755Z AUTO 21016G24KT 180V240 1SM R11/P6000FT -RA BR BKN015 OVC025 06/04 A2990 \
             RMK AO2 PK WND 20032/25 WSHFT 1715 VIS 3/4V1 1/2 VIS 3/4 RWY11 RAB07 CIG 013V017 CIG 017 RWY11 \
             PRESFR SLP125 P0003 60009 T00640036 10066 21012 58033 TSNO $",
        );

        assert_eq!(metar.station_id, "KABC");
        assert_eq!(
            metar.observation_time,
            Utc.with_ymd_and_hms(2024, 3, 12, 17, 55, 0).unwrap()
        );
        assert!(metar.remarks.auto);
        assert_eq!(metar.wind_dir_degrees.as_deref(), Some("210"));
        assert_eq!(metar.wind_speed_kt, Some(16.0));
        assert_eq!(metar.wind_gust_kt, Some(24.0));
        assert_eq!(metar.variable_wind_dir_degrees.as_deref(), Some("180V240"));
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("1"));
        assert_eq!(
            metar.runway_visual_range,
            vec![RunwayVisualRange {
                runway: "11".to_string(),
                visibility_ft: Some("P6000".to_string()),
                ..Default::default()
            }]
        );
        assert_eq!(metar.weather_phenomena, vec!["-RA", "BR"]);
        assert_eq!(metar.sky_condition.len(), 2);
        assert_eq!(metar.sky_condition[0].sky_cover, "BKN");
        assert_eq!(metar.sky_condition[0].cloud_base_ft_agl, Some(1500));
        assert_eq!(metar.sky_condition[1].cloud_base_ft_agl, Some(2500));
        assert_eq!(metar.altim_in_hg, Some(29.90));

        // Precise remark temperatures override the rounded body values
        assert_eq!(metar.temp_c, Some(6.4));
        assert_eq!(metar.dewpoint_c, Some(3.6));
        assert!(metar.remarks.auto_station_with_precipitation);
        assert!(metar.remarks.thunderstorm_information_not_available);
        assert!(metar.remarks.maintenance_indicator_on);
        assert_eq!(
            metar.remarks.peak_wind,
            Some(PeakWind {
                degrees: 200,
                speed: 32,
                hour: None,
                minutes: 25
            })
        );
        assert_eq!(metar.sea_level_pressure_mb, Some(1012.5));

        assert_eq!(metar.flight_category, FlightCategory::Ifr);
        let humidity = metar.humidity.unwrap();
        assert!((humidity - 86.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_day_is_vfr() {
        let metar = parse(
            "KMIA 090053Z 33004KT 10SM FEW015 FEW024 SCT075 SCT250 25/22 A2990 RMK AO2 SLP126 T02500217 $",
        );
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("10"));
        assert_eq!(metar.sky_condition.len(), 4);
        assert_eq!(metar.flight_category, FlightCategory::Vfr);
        assert_eq!(metar.temp_c, Some(25.0));
        assert_eq!(metar.dewpoint_c, Some(21.7));
        assert_eq!(metar.sea_level_pressure_mb, Some(1012.6));
    }

    #[test]
    fn test_negative_dewpoint_and_peak_wind_hour() {
        let metar = parse(
            "KMRB 082253Z 30014G23KT 10SM CLR 05/M12 A3002 RMK AO2 PK WND 30028/2157 SLP168 T00501117",
        );
        assert_eq!(metar.sky_condition[0].sky_cover, "CLR");
        assert_eq!(metar.temp_c, Some(5.0));
        assert_eq!(metar.dewpoint_c, Some(-11.7));
        assert_eq!(
            metar.remarks.peak_wind,
            Some(PeakWind {
                degrees: 300,
                speed: 28,
                hour: Some(21),
                minutes: 57
            })
        );
        assert!((metar.humidity.unwrap() - 16.5).abs() < 1e-9);
    }

    #[test]
    fn test_metric_report() {
        let metar = parse("UUEE 151030Z 24005MPS 9999 SCT020 M02/M05 Q1012 NOSIG");
        assert_eq!(metar.wind_speed_kt, Some(9.7));
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("P10"));
        assert_eq!(metar.sky_condition[0].cloud_base_ft_agl, Some(2000));
        assert_eq!(metar.temp_c, Some(-2.0));
        assert_eq!(metar.dewpoint_c, Some(-5.0));
        assert_eq!(metar.sea_level_pressure_mb, Some(1012.0));
        assert!(metar.remarks.no_significant_change);
        assert_eq!(metar.flight_category, FlightCategory::Vfr);
    }

    #[test]
    fn test_metric_visibility_converted() {
        let metar = parse("EDDF 151020Z 25008KT 5000 BR BKN008 08/07 Q1008");
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("3.11"));
        assert_eq!(metar.weather_phenomena, vec!["BR"]);
        assert_eq!(metar.flight_category, FlightCategory::Ifr);
    }

    #[test]
    fn test_whole_and_fraction_visibility() {
        let metar = parse("KXYZ 151053Z 00000KT 1 1/2SM BR OVC004 10/09 A2992");
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("1.5"));
        assert_eq!(metar.flight_category, FlightCategory::Lifr);
    }

    #[test]
    fn test_less_than_quarter_mile_with_vertical_visibility() {
        let metar = parse("KXYZ 151053Z 00000KT M1/4SM FG VV001 10/10 A2992");
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("M0.25"));
        assert_eq!(metar.sky_condition[0].sky_cover, "VV");
        assert_eq!(metar.sky_condition[0].cloud_base_ft_agl, Some(100));
        assert_eq!(metar.flight_category, FlightCategory::Lifr);
        assert_eq!(metar.humidity, Some(100.0));
    }

    #[test]
    fn test_greater_than_visibility() {
        let metar = parse("KXYZ 151053Z 18005KT P6SM SKC 20/10 A3001");
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("P6"));
        assert_eq!(metar.flight_category, FlightCategory::Vfr);
    }

    #[test]
    fn test_cavok() {
        let metar = parse("EGLL 151050Z 27010KT CAVOK 15/08 Q1020");
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("P10"));
        assert_eq!(metar.sky_condition[0].sky_cover, "CLR");
        assert_eq!(metar.flight_category, FlightCategory::Vfr);
    }

    #[test]
    fn test_split_wind_unit() {
        let metar = parse("KXYZ 151053Z 21016 KT 10SM CLR 10/05 A3000");
        assert_eq!(metar.wind_dir_degrees.as_deref(), Some("210"));
        assert_eq!(metar.wind_speed_kt, Some(16.0));
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("10"));
    }

    #[test]
    fn test_variable_wind_and_variable_rvr() {
        let metar = parse("KXYZ 151053Z VRB03KT 1/2SM R04L/1200V2400FT FG OVC002 05/05 A2980");
        assert_eq!(metar.wind_dir_degrees.as_deref(), Some("VRB"));
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("0.5"));
        let rvr = &metar.runway_visual_range[0];
        assert_eq!(rvr.runway, "04L");
        assert_eq!(rvr.variable_visibility_low_ft.as_deref(), Some("1200"));
        assert_eq!(rvr.variable_visibility_high_ft.as_deref(), Some("2400"));
        assert!(rvr.visibility_ft.is_none());
    }

    #[test]
    fn test_unknown_cloud_base_and_convective_clouds() {
        let metar = parse("KXYZ 151053Z 20010KT 10SM BKN///TCU SCT030CB OVC/// 22/18 A2990");
        assert_eq!(metar.sky_condition[0].cloud_base_ft_agl, None);
        assert_eq!(
            metar.sky_condition[0].significant_convective_clouds.as_deref(),
            Some("TCU")
        );
        assert_eq!(
            metar.sky_condition[1].significant_convective_clouds.as_deref(),
            Some("CB")
        );
        // Layers without a base do not form a ceiling
        assert_eq!(metar.flight_category, FlightCategory::Vfr);
    }

    #[test]
    fn test_trend_groups_do_not_override_observation() {
        let metar = parse("EGLL 151050Z 27010KT 9999 FEW030 15/08 Q1020 TEMPO 4000 RA BKN010");
        assert!(metar.remarks.temporary_change);
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("P10"));
        assert!(metar.weather_phenomena.is_empty());
        assert_eq!(metar.sky_condition.len(), 1);
    }

    #[test]
    fn test_secondary_location_remarks() {
        let metar = parse("KXYZ 151053Z 00000KT 10SM CLR 10/05 A3000 RMK AO2 VISNO RWY06 CHINO RWY24 PNO RVRNO");
        assert_eq!(
            metar.remarks.visibility_at_secondary_location_not_available.as_deref(),
            Some("RWY06")
        );
        assert_eq!(
            metar.remarks.sky_condition_at_secondary_location_not_available.as_deref(),
            Some("RWY24")
        );
        assert!(metar.remarks.precipitation_information_not_available);
        assert!(metar.remarks.rvr_missing);
    }

    #[test]
    fn test_trailing_visno_without_location() {
        let metar = parse("KXYZ 151053Z 00000KT 10SM CLR 10/05 A3000 RMK VISNO");
        assert!(metar.remarks.visibility_at_secondary_location_not_available.is_none());
    }

    #[test]
    fn test_unknown_groups_are_skipped() {
        let metar = parse("KXYZ 151053Z 00000KT GARBAGE 10SM ??? CLR 10/05 A3000");
        assert_eq!(metar.visibility_statute_mi.as_deref(), Some("10"));
        assert_eq!(metar.altim_in_hg, Some(30.0));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Metar::parse("", reference()), Err(MetarParseError::Empty));
        assert_eq!(Metar::parse("   ", reference()), Err(MetarParseError::Empty));
        assert!(matches!(
            Metar::parse("KABC 121755Z", reference()),
            Err(MetarParseError::TooShort(_))
        ));
        assert!(matches!(
            Metar::parse("METAR KABC 121755Z", reference()),
            Err(MetarParseError::TooShort(_))
        ));
        assert!(matches!(
            Metar::parse("KABC 12175Z 00000KT", reference()),
            Err(MetarParseError::ObservationTime { .. })
        ));
        assert!(matches!(
            Metar::parse("KABC 122575Z 00000KT", reference()),
            Err(MetarParseError::ObservationTime { .. })
        ));
    }

    #[test]
    fn test_observation_in_previous_month() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let metar = Metar::parse("KABC 312355Z 00000KT 10SM CLR", reference).unwrap();
        assert_eq!(
            metar.observation_time,
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 55, 0).unwrap()
        );

        let same_day = Metar::parse("KABC 050005Z 00000KT 10SM CLR", reference).unwrap();
        assert_eq!(
            same_day.observation_time,
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_humidity_clamped() {
        assert_eq!(estimate_humidity(10.0, 10.0), 100.0);
        assert_eq!(estimate_humidity(40.0, 0.0), 0.0);
        assert_eq!(estimate_humidity(20.0, 18.0), 90.0);
    }

    #[test]
    fn test_parse_many_drops_bad_lines() {
        let text = "KMIA 090053Z 33004KT 10SM FEW015 25/22 A2990\n\n\
                    not a metar\n\
                    KMRB 082253Z 30014G23KT 10SM CLR 05/M12 A3002\n";
        let metars = parse_many(text, reference());
        assert_eq!(metars.len(), 2);
        assert_eq!(metars[0].station_id, "KMIA");
        assert_eq!(metars[1].station_id, "KMRB");
    }

    #[test]
    fn test_json_shape() {
        let metar = parse("KXYZ 151053Z 18005KT 10SM OVC020 20/10 A3001");
        let json = serde_json::to_value(&metar).unwrap();
        assert_eq!(json["station_id"], "KXYZ");
        assert_eq!(json["flight_category"], "MVFR");
        assert_eq!(json["sky_condition"][0]["sky_cover"], "OVC");
        assert_eq!(json["sky_condition"][0]["cloud_base_ft_agl"], 2000);
        assert!(json.get("wind_gust_kt").is_none());

        let back: Metar = serde_json::from_value(json).unwrap();
        assert_eq!(back, metar);
    }
}
