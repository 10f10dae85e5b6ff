//! HTTP 端点：POST /chat/langgraph 以 SSE 推送一次运行的事件
//!
//! 每个请求对应一个 StreamSession；客户端断开时响应体被丢弃，会话随之取消运行。

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::agent::AgentRuntime;
use crate::memory::Message;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub history: Vec<Message>,
}

pub fn router(runtime: AgentRuntime) -> Router {
    Router::new()
        .route("/chat/langgraph", post(chat_langgraph))
        .route("/health", get(|| async { "OK" }))
        .with_state(runtime)
}

async fn chat_langgraph(State(runtime): State<AgentRuntime>, Json(req): Json<ChatRequest>) -> Response {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return (StatusCode::BAD_REQUEST, "question is required").into_response();
    }
    let chat_id = req
        .chat_id
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let limit = runtime.config.app.history_limit;
    let history = if req.history.len() > limit {
        req.history[req.history.len() - limit..].to_vec()
    } else {
        req.history
    };
    tracing::info!(chat_id = %chat_id, "chat request accepted");

    let session = runtime.ask(question, history, chat_id);
    let body = session
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame.to_sse())));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
