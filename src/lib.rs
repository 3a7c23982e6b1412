pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod geo;
pub mod viewport;
pub mod weather;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::weather::{MetarService, MetarSource};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub metars: Arc<MetarService>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, source: Arc<dyn MetarSource>) -> Self {
        let metars = Arc::new(MetarService::new(db.clone(), source, &config.weather));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            metars,
            rate_limiter,
        }
    }
}
