use super::{CapabilityTable, CredentialStore, Modality, ModelCatalog, UpstreamClient};
use crate::errors::{classify, ClassifiedError, UpstreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt::Display, str::FromStr, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListMode {
    #[default]
    All,
    Free,
    Paid,
}

impl FromStr for ListMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(ListMode::All),
            "free" => Ok(ListMode::Free),
            "paid" => Ok(ListMode::Paid),
            other => Err(format!(
                "Unknown mode '{}'. Expected one of: all, free, paid.",
                other
            )),
        }
    }
}

impl Display for ListMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ListMode::All => "all",
            ListMode::Free => "free",
            ListMode::Paid => "paid",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub created: i64,
    pub context_length: Option<u64>,
    pub prompt_price: Option<String>,
    pub completion_price: Option<String>,
    pub input_modalities: Vec<Modality>,
}

impl ModelDescriptor {
    /// `:free` variants, or models whose prompt and completion prices are both zero.
    pub fn is_free(&self) -> bool {
        if self.id.ends_with(":free") {
            return true;
        }
        let zero = |price: &Option<String>| {
            price
                .as_deref()
                .and_then(|p| p.trim().parse::<f64>().ok())
                .is_some_and(|p| p == 0.0)
        };
        zero(&self.prompt_price) && zero(&self.completion_price)
    }

    /// The vendor prefix of the slug, `openai` for `openai/gpt-4o`.
    pub fn owned_by(&self) -> &str {
        self.id
            .split_once('/')
            .map(|(vendor, _)| vendor)
            .unwrap_or("upstream")
    }
}

#[derive(Deserialize, Debug)]
struct CatalogPage {
    #[serde(default)]
    data: Vec<CatalogEntry>,
}

#[derive(Deserialize, Debug)]
struct CatalogEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    context_length: Option<u64>,
    #[serde(default)]
    pricing: Option<Pricing>,
    #[serde(default)]
    architecture: Option<Architecture>,
}

#[derive(Deserialize, Debug)]
struct Pricing {
    #[serde(default)]
    prompt: Option<Value>,
    #[serde(default)]
    completion: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct Architecture {
    #[serde(default)]
    input_modalities: Vec<String>,
}

fn price(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl From<CatalogEntry> for ModelDescriptor {
    fn from(entry: CatalogEntry) -> Self {
        let (prompt_price, completion_price) = match entry.pricing {
            Some(p) => (price(p.prompt), price(p.completion)),
            None => (None, None),
        };
        let mut input_modalities: Vec<Modality> = entry
            .architecture
            .map(|a| a.input_modalities)
            .unwrap_or_default()
            .iter()
            .filter_map(|name| Modality::from_catalog_name(name))
            .collect();
        input_modalities.dedup();

        Self {
            name: entry.name.unwrap_or_else(|| entry.id.clone()),
            id: entry.id,
            created: entry.created.unwrap_or_default(),
            context_length: entry.context_length,
            prompt_price,
            completion_price,
            input_modalities,
        }
    }
}

/// Parses an upstream `/models` body.
pub fn parse_catalog(body: &[u8]) -> serde_json::Result<Vec<ModelDescriptor>> {
    let page: CatalogPage = serde_json::from_slice(body)?;
    Ok(page.data.into_iter().map(ModelDescriptor::from).collect())
}

pub fn filter_models(
    models: &[ModelDescriptor],
    mode: ListMode,
    search: Option<&str>,
    provider: Option<&str>,
    limit: Option<usize>,
) -> Vec<ModelDescriptor> {
    let search = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let provider = provider.map(str::trim).filter(|p| !p.is_empty());

    models
        .iter()
        .filter(|m| match mode {
            ListMode::All => true,
            ListMode::Free => m.is_free(),
            ListMode::Paid => !m.is_free(),
        })
        .filter(|m| {
            search.as_deref().is_none_or(|needle| {
                m.id.to_lowercase().contains(needle) || m.name.to_lowercase().contains(needle)
            })
        })
        .filter(|m| provider.is_none_or(|p| m.owned_by().eq_ignore_ascii_case(p)))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

type CachedModels = (Instant, Arc<Vec<ModelDescriptor>>);

/// Model list fetched from the upstream and cached for `ttl`.
///
/// A failed refresh falls back to the previous list when there is one.
pub struct UpstreamModelCatalog {
    upstream: UpstreamClient,
    credentials: Arc<dyn CredentialStore>,
    ttl: Duration,
    capabilities: Option<Arc<CapabilityTable>>,
    cache: Mutex<Option<CachedModels>>,
}

impl UpstreamModelCatalog {
    pub fn new(
        upstream: UpstreamClient,
        credentials: Arc<dyn CredentialStore>,
        ttl: Duration,
        capabilities: Option<Arc<CapabilityTable>>,
    ) -> Self {
        Self {
            upstream,
            credentials,
            ttl,
            capabilities,
            cache: Mutex::new(None),
        }
    }

    pub async fn models(&self) -> Result<Arc<Vec<ModelDescriptor>>, ClassifiedError> {
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, models)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(models.clone());
            }
        }

        match self.fetch().await {
            Ok(models) => {
                let models = Arc::new(models);
                *cache = Some((Instant::now(), models.clone()));
                Ok(models)
            }
            Err(err) => match cache.as_ref() {
                Some((_, stale)) => {
                    tracing::warn!("[Catalog] Refresh failed, serving cached list: {}", err);
                    Ok(stale.clone())
                }
                None => Err(err),
            },
        }
    }

    async fn fetch(&self) -> Result<Vec<ModelDescriptor>, ClassifiedError> {
        let credential = self.credentials.configured_credential();
        let res = self.upstream.fetch_models(&credential).await.map_err(|e| {
            tracing::error!("[Catalog] Error fetching models: {}", e);
            ClassifiedError::from_transport(&e)
        })?;

        let status = res.status();
        if !status.is_success() {
            let raw_body = res.text().await.unwrap_or_default();
            return Err(classify(&UpstreamError {
                status: status.as_u16(),
                raw_body,
                model: String::new(),
            }));
        }

        let body = res
            .bytes()
            .await
            .map_err(|e| ClassifiedError::from_transport(&e))?;
        let models = parse_catalog(&body).map_err(|e| {
            ClassifiedError::internal(format!(
                "The upstream model list could not be parsed: {}",
                e
            ))
        })?;

        if let Some(table) = self.capabilities.as_ref() {
            for model in models.iter().filter(|m| !m.input_modalities.is_empty()) {
                table.set(&model.id, model.input_modalities.iter().copied());
            }
        }
        tracing::info!("[Catalog] Loaded {} models", models.len());
        Ok(models)
    }
}

#[async_trait]
impl ModelCatalog for UpstreamModelCatalog {
    async fn list(
        &self,
        mode: ListMode,
        search: Option<&str>,
        provider: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ModelDescriptor>, ClassifiedError> {
        let models = self.models().await?;
        Ok(filter_models(&models, mode, search, provider, limit))
    }
}
