// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    store::{Catalog, Repository},
};

/// Shared handles passed to every handler.
/// Catalog and repository are trait objects so tests can swap in the
/// in-memory store.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub repo: Arc<dyn Repository>,
    pub config: Config,
}

impl AppState {
    /// Uses one store for both the catalog and the repository.
    pub fn from_store<S>(store: Arc<S>, config: Config) -> Self
    where
        S: Catalog + Repository + 'static,
    {
        Self {
            catalog: store.clone(),
            repo: store,
            config,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
