use std::sync::Arc;

use config::Config;
use geo::GeoLocator;
use hub::PresenceHub;

pub mod config;
pub mod error;
pub mod geo;
pub mod hub;
pub mod middleware;
pub mod presence;
pub mod router;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub hub: Arc<PresenceHub>,
    pub geo: GeoLocator,
}
