// src/handlers/mod.rs

pub mod admin;
pub mod health;
pub mod progress;
pub mod ranking;
pub mod sessions;
