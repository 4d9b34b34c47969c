// Copyright (C) 2026 Steptrack Maintainers
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.
//!
//! The retention window is carried here as an explicit value handed to the
//! tracker at construction; there is no process-wide retention global.

use chrono::Duration;

/// Steptrack tracker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum connections in the store pool
    pub max_connections: u32,
    /// Retention window applied when a plan is archived
    pub retention: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `STEPTRACK_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `STEPTRACK_MAX_CONNECTIONS`: Store pool size (default: 5)
    /// - `STEPTRACK_RETENTION_DAYS`: Days records of an archived plan are
    ///   kept before becoming sweep-eligible (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("STEPTRACK_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("STEPTRACK_DATABASE_URL"))?;

        let max_connections: u32 = std::env::var("STEPTRACK_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("STEPTRACK_MAX_CONNECTIONS", "must be a positive integer")
            })?;

        let retention_days: i64 = std::env::var("STEPTRACK_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("STEPTRACK_RETENTION_DAYS", "must be a positive integer")
            })?;
        if retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "STEPTRACK_RETENTION_DAYS",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            database_url,
            max_connections,
            retention: Duration::days(retention_days),
        })
    }

    /// Build a configuration from explicit values.
    ///
    /// For embedders that manage their own configuration sources.
    pub fn new(database_url: impl Into<String>, max_connections: u32, retention: Duration) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
            retention,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
