// src/engine/mod.rs

//! Question selection, progress aggregation and ranking.
//!
//! Everything here takes its storage and limits as explicit parameters;
//! nothing reads global configuration.

pub mod history;
pub mod pool;
pub mod progress;
pub mod ranking;
pub mod readiness;
pub mod scope;
pub mod selection;
pub mod session;
pub mod window;
