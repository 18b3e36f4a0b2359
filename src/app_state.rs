use std::sync::Arc;

use sqlx::PgPool;

use crate::clients::arcgis::ArcGisClient;
use crate::clients::docusign::DocusignClient;
use crate::clients::mediavalet::MediaValetClient;
use crate::config::Config;

/// Shared per-process state: the DB pool plus one client per external
/// service. The clients own the token slots, so sharing them here is what
/// makes the token cache process-wide.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub arcgis: Arc<ArcGisClient>,
    pub mediavalet: Arc<MediaValetClient>,
    pub docusign: Arc<DocusignClient>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Arc<Config>, http: reqwest::Client) -> Self {
        Self {
            pool,
            arcgis: Arc::new(ArcGisClient::new(config.clone(), http.clone())),
            mediavalet: Arc::new(MediaValetClient::new(config.clone(), http.clone())),
            docusign: Arc::new(DocusignClient::new(config.clone(), http)),
            config,
        }
    }
}
