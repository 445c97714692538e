// src/models/mod.rs

pub mod answer;
pub mod progress;
pub mod question;
pub mod ranking;
pub mod scope;
pub mod session;
