// src/config.rs

use std::env;
use std::net::SocketAddr;

use dotenvy::dotenv;

use crate::engine::selection::SelectionLimits;

/// Upper bound on questions materialized for a single scope resolution.
pub const DEFAULT_MAX_SCOPE_CANDIDATES: usize = 5_000;

/// Largest batch a single test may request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Minimum answered questions for a user to appear in a ranking.
pub const DEFAULT_RANKING_MIN_QUESTIONS: i64 = 5;

/// Token lifetime when signing tokens for local tooling and tests.
pub const DEFAULT_JWT_EXPIRATION_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    pub max_scope_candidates: usize,
    pub max_batch_size: usize,
    pub ranking_min_questions: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|value| value.parse::<SocketAddr>().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: parse_or("JWT_EXPIRATION", DEFAULT_JWT_EXPIRATION_SECS),
            rust_log,
            bind_addr,
            max_scope_candidates: parse_or("MAX_SCOPE_CANDIDATES", DEFAULT_MAX_SCOPE_CANDIDATES),
            max_batch_size: parse_or("MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE),
            ranking_min_questions: parse_or("RANKING_MIN_QUESTIONS", DEFAULT_RANKING_MIN_QUESTIONS),
        }
    }

    /// Configuration for tests and embedded use, no environment lookups.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: String::new(),
            jwt_secret: jwt_secret.to_string(),
            jwt_expiration: 600,
            rust_log: "error".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_scope_candidates: DEFAULT_MAX_SCOPE_CANDIDATES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            ranking_min_questions: DEFAULT_RANKING_MIN_QUESTIONS,
        }
    }

    pub fn selection_limits(&self) -> SelectionLimits {
        SelectionLimits {
            max_candidates: self.max_scope_candidates,
            max_batch_size: self.max_batch_size,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}
