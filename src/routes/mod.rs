mod chat;
mod health;
mod models;

pub use chat::chat_completions;
pub use health::health;
pub use models::{list_models, ModelsQuery};

use crate::{
    app_state::AppState,
    errors::ClassifiedError,
    middlewares::{handle_cors, handle_request_id},
};
use axum::{
    http::{StatusCode, Uri},
    middleware,
    routing::{get, post},
    Router,
};
use std::{collections::HashSet, sync::Arc};

/// Inline images and files arrive base64 encoded.
pub(crate) const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

pub fn router(app: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health));

    let mut seen: HashSet<&str> = HashSet::from(["/v1/models", "/v1/chat/completions", "/health"]);
    for alias in &app.env.models_aliases {
        if seen.insert(alias.as_str()) {
            router = router.route(alias, get(list_models));
        }
    }

    router
        .fallback(not_found)
        .layer(middleware::from_fn(handle_cors))
        .layer(middleware::from_fn(handle_request_id))
        .with_state(app)
}

async fn not_found(uri: Uri) -> ClassifiedError {
    ClassifiedError::validation(format!("Not Found: no route for {}", uri.path()))
        .with_status(StatusCode::NOT_FOUND)
}
