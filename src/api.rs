use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    agent,
    app_state::AppState,
    models::{ChatMessage, SourceInfo, TrustAudit},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatCompletionPayload {
    model: String,
    messages: Vec<ChatMessage>,
}

/// Respuesta con la forma clásica de /chat/completions: exactamente una
/// choice de asistente, más el payload de auditoría que renderiza el
/// frontend.
#[derive(Serialize)]
pub struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChatChoice>,
    audit: TrustAudit,
}

#[derive(Serialize)]
pub struct ChatChoice {
    index: u32,
    message: ChatMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: &'static str,
    model: String,
    documents: usize,
    chunks: usize,
    embedding_dimensions: usize,
    input_guards: usize,
    output_guards: usize,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/api/status", get(status_handler))
        .route("/api/documents", get(documents_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_completions_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatCompletionPayload>,
) -> Result<Json<ChatCompletionResponse>, (StatusCode, Json<serde_json::Value>)> {
    if payload.model != state.config.served_model_id {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!(
                    "Modelo desconocido: '{}'. Este servidor sirve '{}'.",
                    payload.model, state.config.served_model_id
                )
            })),
        ));
    }

    if let Err(e) = agent::validate_history(&payload.messages) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Historial inválido: {e}") })),
        ));
    }

    let result = agent::chat_turn(
        &state.llm_manager,
        state.index.clone(),
        &state.guardrails,
        &state.config,
        &payload.messages,
    )
    .await;

    match result {
        Ok((answer, audit)) => Ok(Json(ChatCompletionResponse {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: payload.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: answer,
                },
                finish_reason: "stop",
            }],
            audit,
        })),
        Err(e) => {
            error!("Error procesando el turno conversacional: {e:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Error al procesar el turno: {e}") })),
            ))
        }
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        model: state.config.served_model_id.clone(),
        documents: state.index.sources().len(),
        chunks: state.index.len(),
        embedding_dimensions: state.index.dimensions(),
        input_guards: state.guardrails.input_guard_count(),
        output_guards: state.guardrails.output_guard_count(),
    })
}

#[axum::debug_handler]
async fn documents_handler(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    Json(state.index.sources().to_vec())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn el_payload_de_chat_se_deserializa() {
        let payload: ChatCompletionPayload = serde_json::from_str(
            r#"{
                "model": "docs-agent",
                "messages": [
                    {"role": "user", "content": "What is this project?"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(payload.model, "docs-agent");
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].role, "user");
    }

    #[test]
    fn la_respuesta_de_chat_se_serializa_con_una_choice() {
        let response = ChatCompletionResponse {
            id: "chatcmpl-test".to_string(),
            object: "chat.completion",
            created: 0,
            model: "docs-agent".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: "respuesta".to_string(),
                },
                finish_reason: "stop",
            }],
            audit: TrustAudit {
                trust_score: 1.0,
                summary: "ok".to_string(),
                dimensions: Default::default(),
            },
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "respuesta");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["audit"]["trust_score"], 1.0);
    }
}
