//! Air quality health service.
//!
//! Derives EPA AQI from pollutant concentrations, forecasts it with a tree
//! ensemble or ARIMA(2,1,2), and scores the health risk for vulnerable
//! population groups of major Indian cities.
//!
//! The computational core (`aqi`, `features`, `forecast`, `risk`, `alerts`)
//! is synchronous and free of I/O. `collector`, `store`, `schema` and
//! `routes` connect it to OpenAQ, PostgreSQL and HTTP.

pub mod alerts;
pub mod aqi;
pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod models;
pub mod risk;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use models::{Measurement, MeasurementSeries, RawMeasurement};
