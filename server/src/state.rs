use mediaconvert_core::http_client::HttpClient;
use mediaconvert_core::store::Store;
use mediaconvert_core::Config;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub http: Arc<HttpClient>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::connect(&config.redis_url).await?;
        let http = HttpClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            http: Arc::new(http),
        })
    }
}
