//! Data models for the weather service.
//!
//! - `City`, `NewCity`: cities observations are recorded against
//! - `Weather`, `NewWeather`: individual weather observations

pub mod city;
pub mod weather;

pub use city::{City, NewCity};
pub use weather::{NewWeather, Weather, WeatherValidationError};
