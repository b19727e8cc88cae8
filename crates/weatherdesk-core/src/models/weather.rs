//! Weather observation models.
//!
//! Field names follow the remote API (`windSpeed`, `dateRecorded`), and
//! `dateRecorded` is a local date-time without zone, e.g.
//! `2024-05-01T12:00:00`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::City;

/// Accepted temperature range in degrees Celsius
const MIN_TEMPERATURE: f64 = -50.0;
const MAX_TEMPERATURE: f64 = 50.0;

/// Accepted pressure range in hPa
const MIN_PRESSURE: f64 = 800.0;
const MAX_PRESSURE: f64 = 1200.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Weather {
    pub id: i64,
    pub city: City,
    pub temperature: f64,
    pub humidity: i32,
    pub wind_speed: f64,
    pub pressure: f64,
    pub status: String,
    pub date_recorded: NaiveDateTime,
}

/// Payload for creating or updating an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NewWeather {
    pub city: City,
    pub temperature: f64,
    pub humidity: i32,
    pub wind_speed: f64,
    pub pressure: f64,
    pub status: String,
    pub date_recorded: NaiveDateTime,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WeatherValidationError {
    #[error("Temperature must be between -50 and 50°C")]
    Temperature,

    #[error("Humidity must be between 0 and 100%")]
    Humidity,

    #[error("Wind speed cannot be negative")]
    WindSpeed,

    #[error("Pressure must be between 800 and 1200 hPa")]
    Pressure,

    #[error("Weather status cannot be empty")]
    EmptyStatus,
}

impl NewWeather {
    /// Check the ranges the server enforces, so obviously bad input is
    /// reported without a round trip.
    pub fn validate(&self) -> Result<(), WeatherValidationError> {
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(WeatherValidationError::Temperature);
        }
        if !(0..=100).contains(&self.humidity) {
            return Err(WeatherValidationError::Humidity);
        }
        if self.wind_speed < 0.0 || self.wind_speed.is_nan() {
            return Err(WeatherValidationError::WindSpeed);
        }
        if !(MIN_PRESSURE..=MAX_PRESSURE).contains(&self.pressure) {
            return Err(WeatherValidationError::Pressure);
        }
        if self.status.trim().is_empty() {
            return Err(WeatherValidationError::EmptyStatus);
        }
        Ok(())
    }
}

impl From<Weather> for NewWeather {
    fn from(w: Weather) -> Self {
        Self {
            city: w.city,
            temperature: w.temperature,
            humidity: w.humidity,
            wind_speed: w.wind_speed,
            pressure: w.pressure,
            status: w.status,
            date_recorded: w.date_recorded,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
