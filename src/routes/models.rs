use crate::{
    app_state::AppState,
    errors::ClassifiedError,
    providers::{ListMode, ModelDescriptor},
};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize, Debug, Default)]
pub struct ModelsQuery {
    pub mode: Option<String>,
    pub search: Option<String>,
    pub provider: Option<String>,
    pub limit: Option<String>,
}

pub async fn list_models(
    State(app): State<Arc<AppState>>,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<Value>, ClassifiedError> {
    let mode = match query.mode.as_deref() {
        Some(raw) => raw.parse::<ListMode>().map_err(ClassifiedError::validation)?,
        None => ListMode::All,
    };
    let limit = match query.limit.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
            ClassifiedError::validation(format!("Invalid limit '{}'.", raw))
        })?),
        None => None,
    };

    let models = app
        .catalog
        .list(mode, query.search.as_deref(), query.provider.as_deref(), limit)
        .await?;
    tracing::info!("[Models] mode={} returned {}", mode, models.len());

    Ok(Json(json!({
        "object": "list",
        "data": models.iter().map(model_entry).collect::<Vec<_>>(),
    })))
}

fn model_entry(model: &ModelDescriptor) -> Value {
    json!({
        "id": model.id,
        "object": "model",
        "created": model.created,
        "owned_by": model.owned_by(),
        "name": model.name,
        "context_length": model.context_length,
        "pricing": {
            "prompt": model.prompt_price,
            "completion": model.completion_price,
        },
        "architecture": {
            "input_modalities": model.input_modalities,
        },
    })
}
