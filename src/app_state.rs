use std::sync::Arc;

use crate::config::Config;
use crate::counter::CounterService;

#[derive(Clone)]
pub struct AppState {
    pub counter: Arc<CounterService>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let counter = Arc::new(CounterService::new(&config).await);

        Ok(Self { counter, config })
    }
}
