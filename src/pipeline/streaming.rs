//! Event-stream relay.
//!
//! Once the `200` and event-stream headers are out, a status code can no
//! longer report failure, so every error after that point is delivered as an
//! ordinary chunk whose text is the error message. Whatever happens upstream,
//! the client sees at least one frame and exactly one `[DONE]`.

use super::classify_upstream;
use crate::{
    app_state::AppState,
    errors::{ClassifiedError, ErrorKind, UpstreamError},
    providers::NotificationSink,
    translate::{normalize_chunk, translate_request},
    utils::{
        data_types::{completion_id, unix_now, ChatRequest, StreamChunk},
        sse::{data_frame, done_frame, LineBuffer, DONE_MARKER},
    },
};
use axum::{
    body::{Body, Bytes},
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use serde_json::Value;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Non-data lines kept for diagnosing unexpected upstream formats.
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;
/// Frames are handed over one at a time; nothing is buffered ahead of the client.
const STREAM_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingFrame,
    Done,
}

enum Line<'a> {
    Skip,
    Done,
    Data(&'a str),
    Other(&'a str),
}

fn classify_line(line: &str) -> Line<'_> {
    let line = line.trim_end();
    if line.trim_start().is_empty() || line.starts_with(':') {
        return Line::Skip;
    }
    if let Some(payload) = line.strip_prefix("data:") {
        let payload = payload.trim();
        return match payload {
            "" => Line::Skip,
            DONE_MARKER => Line::Done,
            _ => Line::Data(payload),
        };
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return Line::Skip;
    }
    Line::Other(line)
}

enum Frame {
    Forward(Value),
    Verbatim(String),
    Error(UpstreamError),
}

/// Line-in, frames-out state machine for one stream.
pub struct StreamTranslator {
    model: String,
    id: String,
    created: i64,
    state: StreamState,
    frames: usize,
    diagnostics: String,
    notifier: Arc<dyn NotificationSink>,
}

impl StreamTranslator {
    pub fn new(model: impl Into<String>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            model: model.into(),
            id: completion_id(),
            created: unix_now(),
            state: StreamState::AwaitingFrame,
            frames: 0,
            diagnostics: String::new(),
            notifier,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == StreamState::Done
    }

    /// Content frames written so far, not counting the completion marker.
    pub fn frames_sent(&self) -> usize {
        self.frames
    }

    pub fn push_line(&mut self, line: &str) -> Vec<Bytes> {
        if self.is_done() {
            return Vec::new();
        }
        match classify_line(line) {
            Line::Skip => Vec::new(),
            Line::Done => self.complete(),
            Line::Data(payload) => {
                let frame = self.receive(payload);
                vec![self.emit(frame)]
            }
            Line::Other(text) => {
                self.record_diagnostic(text);
                Vec::new()
            }
        }
    }

    /// Ends the stream with a single error chunk. No-op once done.
    pub fn fail(&mut self, err: &ClassifiedError) -> Vec<Bytes> {
        if self.is_done() {
            return Vec::new();
        }
        let frame = self.error_frame(err);
        self.state = StreamState::Done;
        vec![frame, done_frame()]
    }

    /// Upstream input is exhausted. Writes the marker if upstream never did.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.is_done() {
            return Vec::new();
        }
        tracing::debug!("[Stream] Upstream closed without {}", DONE_MARKER);
        self.complete()
    }

    fn receive(&self, payload: &str) -> Frame {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) if !value.is_object() => {
                tracing::warn!("[Stream] Forwarding non-object frame verbatim");
                Frame::Verbatim(payload.to_owned())
            }
            Ok(value) => match value.get("error").filter(|e| !e.is_null()) {
                Some(error) => Frame::Error(UpstreamError::from_error_object(error, &self.model)),
                None => Frame::Forward(value),
            },
            Err(e) => {
                tracing::warn!("[Stream] Forwarding unparseable frame verbatim: {}", e);
                Frame::Verbatim(payload.to_owned())
            }
        }
    }

    fn emit(&mut self, frame: Frame) -> Bytes {
        match frame {
            Frame::Forward(mut value) => {
                self.frames += 1;
                normalize_chunk(&mut value, &self.model, &self.id, self.created);
                data_frame(&value.to_string())
            }
            Frame::Verbatim(raw) => {
                self.frames += 1;
                data_frame(&raw)
            }
            Frame::Error(upstream) => {
                let classified = classify_upstream(self.notifier.as_ref(), &upstream);
                self.error_frame(&classified)
            }
        }
    }

    fn complete(&mut self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(2);
        if self.frames == 0 {
            out.push(self.no_response_frame());
        }
        out.push(done_frame());
        self.state = StreamState::Done;
        out
    }

    fn no_response_frame(&mut self) -> Bytes {
        let diagnostics = self.diagnostics.trim();
        let upstream_error = serde_json::from_str::<Value>(diagnostics)
            .ok()
            .and_then(|v| v.get("error").filter(|e| !e.is_null()).cloned());

        let classified = match upstream_error {
            Some(error) => classify_upstream(
                self.notifier.as_ref(),
                &UpstreamError::from_error_object(&error, &self.model),
            ),
            None => {
                if !diagnostics.is_empty() {
                    tracing::warn!(
                        diagnostics = %diagnostics,
                        "[Stream] Upstream produced no frames"
                    );
                }
                ClassifiedError::new(
                    ErrorKind::Internal,
                    format!(
                        "No Response: The upstream returned an empty response for '{}'. Please \
                         retry or choose another model.",
                        self.model
                    ),
                )
            }
        };
        self.error_frame(&classified)
    }

    fn error_frame(&mut self, err: &ClassifiedError) -> Bytes {
        self.frames += 1;
        let chunk =
            StreamChunk::assistant_text(&self.id, self.created, &self.model, err.message.clone());
        // A struct of strings and integers always serializes.
        data_frame(&serde_json::to_string(&chunk).unwrap_or_default())
    }

    fn record_diagnostic(&mut self, text: &str) {
        let separator = usize::from(!self.diagnostics.is_empty());
        let remaining = MAX_DIAGNOSTIC_BYTES.saturating_sub(self.diagnostics.len() + separator);
        if remaining == 0 {
            return;
        }
        if separator == 1 {
            self.diagnostics.push('\n');
        }
        let mut end = text.len().min(remaining);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.diagnostics.push_str(&text[..end]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Completed,
    ClientGone,
}

/// Starts the relay and returns the event-stream response immediately; the
/// upstream call happens on a spawned task that owns the request.
pub fn respond(app: Arc<AppState>, credential: String, request: ChatRequest) -> Response<Body> {
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
    let translator = StreamTranslator::new(request.model.clone(), app.notifier.clone());
    tokio::spawn(
        pump(app, credential, request, translator, tx).instrument(tracing::Span::current()),
    );

    let data_stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    });

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(data_stream))
    {
        Ok(res) => res,
        Err(err) => {
            tracing::error!("Error creating response stream: {}", err);
            ClassifiedError::internal(format!("Error creating response stream: {}", err))
                .into_response()
        }
    }
}

async fn pump(
    app: Arc<AppState>,
    credential: String,
    request: ChatRequest,
    mut translator: StreamTranslator,
    tx: mpsc::Sender<Bytes>,
) {
    let upstream_request = translate_request(&request);
    let end = forward(&app, &credential, &upstream_request, &mut translator, &tx).await;
    if end == StreamEnd::ClientGone {
        tracing::debug!("[Stream] Client disconnected, releasing upstream connection");
        return;
    }
    if send_all(&tx, translator.finish()).await == StreamEnd::ClientGone {
        tracing::debug!("[Stream] Client disconnected before the completion marker");
        return;
    }
    tracing::info!(
        "[Stream] {} finished after {} frame(s)",
        request.model,
        translator.frames_sent()
    );
}

async fn forward(
    app: &AppState,
    credential: &str,
    request: &crate::translate::UpstreamChatRequest<'_>,
    translator: &mut StreamTranslator,
    tx: &mpsc::Sender<Bytes>,
) -> StreamEnd {
    let mut res = match app.upstream.send_chat(credential, request).await {
        Ok(res) => res,
        Err(e) => {
            tracing::error!("[Upstream] Error sending request: {}", e);
            return send_all(tx, translator.fail(&ClassifiedError::from_transport(&e))).await;
        }
    };

    let status = res.status();
    if !status.is_success() {
        let raw_body = res.text().await.unwrap_or_default();
        let classified = classify_upstream(
            app.notifier.as_ref(),
            &UpstreamError {
                status: status.as_u16(),
                raw_body,
                model: request.model.to_owned(),
            },
        );
        return send_all(tx, translator.fail(&classified)).await;
    }

    let mut lines = LineBuffer::with_limit(app.env.max_stream_line);
    loop {
        if tx.is_closed() {
            return StreamEnd::ClientGone;
        }
        match res.chunk().await {
            Ok(Some(chunk)) => {
                for line in lines.push(&chunk) {
                    if send_all(tx, translator.push_line(&line)).await == StreamEnd::ClientGone {
                        return StreamEnd::ClientGone;
                    }
                    if translator.is_done() {
                        return StreamEnd::Completed;
                    }
                }
                if lines.is_overflowing() {
                    tracing::error!(
                        "[Stream] Upstream line exceeded {} bytes, abandoning stream",
                        lines.max_line()
                    );
                    let err = ClassifiedError::internal(format!(
                        "Response Too Large: the upstream sent a single stream event over {} \
                         bytes. Please retry or choose another model.",
                        lines.max_line()
                    ));
                    return send_all(tx, translator.fail(&err)).await;
                }
            }
            Ok(None) => {
                return match lines.finish() {
                    Some(line) => send_all(tx, translator.push_line(&line)).await,
                    None => StreamEnd::Completed,
                };
            }
            Err(e) => {
                tracing::error!("[Upstream] Stream interrupted: {}", e);
                return send_all(tx, translator.fail(&ClassifiedError::from_transport(&e))).await;
            }
        }
    }
}

async fn send_all(tx: &mpsc::Sender<Bytes>, frames: Vec<Bytes>) -> StreamEnd {
    for frame in frames {
        if tx.send(frame).await.is_err() {
            return StreamEnd::ClientGone;
        }
    }
    StreamEnd::Completed
}
