use crate::{env::Env, translate::UpstreamChatRequest, utils::create_client};
use axum::http::{header, HeaderMap, HeaderValue};
use eyre::{Result, WrapErr};
use reqwest::{self as r, Url};
use std::time::Duration;

/// The single outbound HTTP surface: one call per inbound request.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    http: r::Client,
    base_url: Url,
    chat_timeout: Duration,
    referer: Option<String>,
    title: Option<String>,
}

impl UpstreamClient {
    pub fn new(env: &Env) -> Result<Self> {
        let http = create_client(env).wrap_err("failed to build upstream http client")?;
        // Url::join replaces the last segment unless the base ends with a slash.
        let mut base = env.upstream_base_url.trim().to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .wrap_err_with(|| format!("invalid UPSTREAM_BASE_URL {}", env.upstream_base_url))?;

        Ok(Self {
            http,
            base_url,
            chat_timeout: env.chat_timeout,
            referer: env.upstream_referer.clone(),
            title: env.upstream_title.clone(),
        })
    }

    pub fn chat_url(&self) -> Url {
        self.endpoint("chat/completions")
    }

    pub fn models_url(&self) -> Url {
        self.endpoint("models")
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    fn headers(&self, credential: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        match HeaderValue::from_str(&format!("Bearer {}", credential)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(header::AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("[Upstream] Stored credential is not a valid header value"),
        }
        if let Some(referer) = self.referer.as_deref() {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert("http-referer", value);
            }
        }
        if let Some(title) = self.title.as_deref() {
            if let Ok(value) = HeaderValue::from_str(title) {
                headers.insert("x-title", value);
            }
        }
        headers
    }

    /// Sends a chat completion. Buffered calls carry the total chat deadline;
    /// streaming calls rely on the client's connect/read timeouts only.
    pub async fn send_chat(
        &self,
        credential: &str,
        body: &UpstreamChatRequest<'_>,
    ) -> r::Result<r::Response> {
        let mut request = self
            .http
            .post(self.chat_url())
            .headers(self.headers(credential))
            .json(body);
        if !body.stream {
            request = request.timeout(self.chat_timeout);
        }
        tracing::debug!("[Upstream] POST {} stream={}", self.chat_url(), body.stream);
        request.send().await
    }

    pub async fn fetch_models(&self, credential: &str) -> r::Result<r::Response> {
        let mut headers = self.headers(credential);
        headers.remove(header::CONTENT_TYPE);
        if credential.is_empty() {
            headers.remove(header::AUTHORIZATION);
        }
        self.http
            .get(self.models_url())
            .headers(headers)
            .timeout(self.chat_timeout)
            .send()
            .await
    }
}
