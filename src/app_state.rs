use crate::{
    env::Env,
    providers::{
        CapabilityTable, CredentialStore, EnvCredentialStore, ModelCapabilityRegistry,
        ModelCatalog, NotificationSink, ThrottledNotifier, UpstreamClient, UpstreamModelCatalog,
    },
    validation::RequestValidator,
};
use eyre::Result;
use std::sync::Arc;

pub struct AppState {
    pub env: Env,
    pub upstream: UpstreamClient,
    pub validator: RequestValidator,
    pub credentials: Arc<dyn CredentialStore>,
    pub capabilities: Arc<dyn ModelCapabilityRegistry>,
    pub notifier: Arc<dyn NotificationSink>,
    pub catalog: Arc<dyn ModelCatalog>,
}

impl AppState {
    pub fn new(env: Env) -> Result<Self> {
        let credentials = Arc::new(EnvCredentialStore::new(env.api_key_var.clone()));
        let capabilities = match env.capabilities_file.as_deref() {
            Some(path) => CapabilityTable::load(path)?,
            None => CapabilityTable::new(),
        };
        Self::from_parts(env, credentials, Arc::new(capabilities))
    }

    /// Wires the relay around the given credential store and capability table.
    /// The catalog shares the table so every refresh updates pre-validation.
    pub fn from_parts(
        env: Env,
        credentials: Arc<dyn CredentialStore>,
        capabilities: Arc<CapabilityTable>,
    ) -> Result<Self> {
        let upstream = UpstreamClient::new(&env)?;
        let catalog = UpstreamModelCatalog::new(
            upstream.clone(),
            credentials.clone(),
            env.catalog_ttl,
            Some(capabilities.clone()),
        );

        Ok(Self {
            validator: RequestValidator::new(env.dedup_window),
            notifier: Arc::new(ThrottledNotifier::new(env.notify_throttle)),
            catalog: Arc::new(catalog),
            capabilities,
            credentials,
            upstream,
            env,
        })
    }
}
