use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::{
    Config, Engine, Result,
    pipeline::tools::{ApiClient, HttpApiClient},
};

pub struct EngineBuilder {
    config: Config,
    async_worker_thread_number: u16,
    rt: Option<Arc<Runtime>>,
    client: Option<Arc<dyn ApiClient>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            async_worker_thread_number: 4,
            rt: None,
            client: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    /// Worker threads for the runtime used by blocking transforms.
    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.async_worker_thread_number = n;
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    /// Replace the reqwest-backed client used by fetch tools.
    pub fn api_client(
        mut self,
        client: Arc<dyn ApiClient>,
    ) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(&self) -> Result<Engine> {
        let client: Arc<dyn ApiClient> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(HttpApiClient::new(&self.config.fetch)),
        };
        let engine = Engine::new(self.config.clone(), client, self.rt.clone(), self.async_worker_thread_number.max(1).into());

        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_config_file() {
        let config = Config::load_from_str("max_depth = 3\n[fetch]\nmode = \"detached\"\n").unwrap();
        let engine = EngineBuilder::new().config(config).async_worker_thread_number(0).build().unwrap();
        assert_eq!(engine.config().max_depth, 3);
        assert_eq!(engine.config().fetch.mode, crate::FetchMode::Detached);
    }
}
