//! Server configuration from environment variables
//!
//! | Variable                 | Default        |
//! |--------------------------|----------------|
//! | `SENSOR_SYNC_ADDR`       | `0.0.0.0:3000` |
//! | `SENSOR_COUNT`           | `5`            |
//! | `SENSOR_CENTER_LAT`      | `52.52`        |
//! | `SENSOR_CENTER_LON`      | `13.405`       |
//! | `SENSOR_RADIUS_KM`       | `5`            |
//! | `PRODUCER_BASE_MS`       | `1000`         |
//! | `PRODUCER_STEP_MS`       | `250`          |
//! | `SESSION_QUEUE_CAPACITY` | `64`           |
//!
//! Unparseable values fall back to the default with a warning.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::api::websocket::broadcaster::DEFAULT_QUEUE_CAPACITY;
use crate::producer::{GeoPoint, ProducerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub sensor_count: usize,
    pub center: GeoPoint,
    pub radius_km: f64,
    pub producer_base: Duration,
    pub producer_step: Duration,
    pub session_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let producer = ProducerConfig::default();
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            sensor_count: 5,
            center: producer.center,
            radius_km: producer.radius_km,
            producer_base: producer.base_interval,
            producer_step: producer.interval_step,
            session_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            addr: parse_or(&lookup, "SENSOR_SYNC_ADDR", defaults.addr),
            sensor_count: parse_or(&lookup, "SENSOR_COUNT", defaults.sensor_count),
            center: GeoPoint::new(
                parse_or(&lookup, "SENSOR_CENTER_LAT", defaults.center.latitude),
                parse_or(&lookup, "SENSOR_CENTER_LON", defaults.center.longitude),
            ),
            radius_km: parse_or(&lookup, "SENSOR_RADIUS_KM", defaults.radius_km),
            producer_base: Duration::from_millis(parse_or(
                &lookup,
                "PRODUCER_BASE_MS",
                defaults.producer_base.as_millis() as u64,
            )),
            producer_step: Duration::from_millis(parse_or(
                &lookup,
                "PRODUCER_STEP_MS",
                defaults.producer_step.as_millis() as u64,
            )),
            session_queue_capacity: parse_or(
                &lookup,
                "SESSION_QUEUE_CAPACITY",
                defaults.session_queue_capacity,
            ),
        }
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            base_interval: self.producer_base,
            interval_step: self.producer_step,
            center: self.center,
            radius_km: self.radius_km,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "invalid configuration value, using default");
            default
        }),
        None => default,
    }
}
