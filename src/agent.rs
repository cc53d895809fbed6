//! Turno conversacional completo: guardarraíl de entrada → agente con la
//! herramienta de recuperación → guardarraíl de salida.
//!
//! Flujo:
//!   1. Escaneo del último mensaje del usuario; un veredicto flagged corta el
//!      turno antes de tocar el modelo.
//!   2. Bucle de razonamiento del agente (Rig) con `lookup_docs` disponible y
//!      un número máximo de rondas de herramientas.
//!   3. Escaneo de la respuesta del agente antes de devolverla.
//!   4. Construcción del payload de auditoría para el frontend.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rig::completion::{Message, Prompt, PromptError};
use tracing::warn;

use crate::config::{AppConfig, LlmProvider};
use crate::guardrails::{GuardrailStage, INPUT_BLOCKED_MESSAGE, OUTPUT_BLOCKED_MESSAGE};
use crate::llm::LlmManager;
use crate::models::{ChatMessage, TrustAudit};
use crate::tools::{LookupDocs, TurnMetrics};
use crate::vector_store::DocumentIndex;

/// Número máximo de rondas de herramientas por turno. Sin este límite un
/// modelo atascado emitiendo tool-calls no terminaría nunca.
const MAX_TOOL_ROUNDS: usize = 3;

/// Texto fijo cuando el bucle se agota sin que el modelo produzca respuesta.
const NO_RESPONSE_FALLBACK: &str = "No response generated.";

const SYSTEM_PROMPT: &str = "\
You are a documentation expert assistant. Your role is to provide accurate, \
concise answers based on the indexed documentation.\n\n\
INSTRUCTIONS:\n\
1. Use the `lookup_docs` tool ONCE to search the documentation, then answer based on those results.\n\
2. DO NOT call lookup_docs multiple times for the same question.\n\
3. Base your answers strictly on the retrieved documentation snippets.\n\
4. When citing information, reference the source file when relevant.\n\
5. If the tool returns nothing or the documentation doesn't contain the answer, acknowledge this clearly and briefly.\n\
6. Keep responses concise and technically accurate (2-3 sentences max when possible).\n";

/// Procesa un turno: historial completo que termina en el mensaje nuevo del
/// usuario → exactamente un mensaje de asistente más su auditoría. Los
/// errores de proveedor se propagan al llamante; los bloqueos de política se
/// resuelven aquí con los mensajes fijos.
pub async fn chat_turn(
    llm: &LlmManager,
    index: Arc<DocumentIndex>,
    guardrails: &GuardrailStage,
    cfg: &AppConfig,
    messages: &[ChatMessage],
) -> Result<(String, TrustAudit)> {
    let (mut history, user_text) = to_rig_history(messages)?;
    let mut dimensions = BTreeMap::new();

    // 1) Guardarraíl de entrada. Ante un error del clasificador el turno se
    //    bloquea (fail-closed): nunca se reenvía entrada sin escanear.
    let user_text = match guardrails.scan_input(&user_text) {
        Ok(verdict) if verdict.flagged => {
            warn!("Entrada bloqueada por guardarraíles: {:?}", verdict.summary);
            dimensions.insert("input-guard".to_string(), 0.0);
            return Ok((
                INPUT_BLOCKED_MESSAGE.to_string(),
                TrustAudit {
                    trust_score: 0.0,
                    summary: "Input blocked by security guardrails.".to_string(),
                    dimensions,
                },
            ));
        }
        Ok(verdict) => match verdict.sanitized {
            Some(clean) => {
                dimensions.insert("input-guard".to_string(), 0.5);
                clean
            }
            None => {
                dimensions.insert("input-guard".to_string(), 1.0);
                user_text
            }
        },
        Err(err) => {
            warn!("Fallo en el guardarraíl de entrada, turno bloqueado: {err}");
            dimensions.insert("input-guard".to_string(), 0.0);
            return Ok((
                INPUT_BLOCKED_MESSAGE.to_string(),
                TrustAudit {
                    trust_score: 0.0,
                    summary: "Input guard failed; request blocked.".to_string(),
                    dimensions,
                },
            ));
        }
    };

    // 2) Agente con la herramienta de recuperación, bucle acotado.
    let metrics = Arc::new(TurnMetrics::default());
    let answer = run_agent(llm, index, cfg, &mut history, &user_text, metrics.clone()).await?;

    let lookups = metrics.lookups.load(Ordering::Relaxed);
    let retrieved = metrics.retrieved_chunks.load(Ordering::Relaxed);
    dimensions.insert(
        "retrieval".to_string(),
        if retrieved > 0 { 1.0 } else { 0.0 },
    );

    // 3) Guardarraíl de salida. Aquí un error del clasificador deja pasar la
    //    respuesta (fail-open) con un aviso: perder un turno entero por un
    //    clasificador roto es peor que devolver texto sin el segundo filtro.
    let final_text = match guardrails.scan_output(&answer) {
        Ok(verdict) if verdict.flagged => {
            warn!("Salida bloqueada por guardarraíles: {:?}", verdict.summary);
            dimensions.insert("output-guard".to_string(), 0.0);
            OUTPUT_BLOCKED_MESSAGE.to_string()
        }
        Ok(verdict) => match verdict.sanitized {
            Some(clean) => {
                dimensions.insert("output-guard".to_string(), 0.5);
                clean
            }
            None => {
                dimensions.insert("output-guard".to_string(), 1.0);
                answer
            }
        },
        Err(err) => {
            warn!("Fallo en el guardarraíl de salida, se devuelve sin filtrar: {err}");
            dimensions.insert("output-guard".to_string(), 0.5);
            answer
        }
    };

    let trust_score = dimensions.values().sum::<f64>() / dimensions.len() as f64;
    let summary = format!(
        "{lookups} retrieval call(s), {retrieved} snippet(s) retrieved; guards applied."
    );

    Ok((
        final_text,
        TrustAudit {
            trust_score,
            summary,
            dimensions,
        },
    ))
}

/// Ejecuta el bucle de razonamiento del modelo con la herramienta de
/// recuperación. El agente de Rig gestiona las rondas de tool-calls; aquí se
/// acota el número de rondas y se aplica el texto de respaldo cuando el
/// modelo no llega a producir una respuesta final.
async fn run_agent(
    llm: &LlmManager,
    index: Arc<DocumentIndex>,
    cfg: &AppConfig,
    history: &mut Vec<Message>,
    user_text: &str,
    metrics: Arc<TurnMetrics>,
) -> Result<String> {
    match llm.provider {
        LlmProvider::OpenAI => {
            use rig::client::CompletionClient as _;

            let client = llm.openai_client()?;
            let agent = client
                .agent(llm.chat_model_name())
                .preamble(SYSTEM_PROMPT)
                .temperature(llm.temperature)
                .max_tokens(llm.max_tokens)
                .tool(LookupDocs::new(index, cfg.retrieval_top_k, metrics))
                .build();

            match agent
                .prompt(user_text)
                .with_history(history)
                .multi_turn(MAX_TOOL_ROUNDS)
                .await
            {
                Ok(text) if !text.trim().is_empty() => Ok(text),
                Ok(_) => {
                    warn!("El modelo no produjo texto; se devuelve el texto de respaldo.");
                    Ok(NO_RESPONSE_FALLBACK.to_string())
                }
                Err(PromptError::MaxDepthError { .. }) => {
                    warn!(
                        "Bucle de herramientas agotado ({MAX_TOOL_ROUNDS} rondas) sin respuesta final."
                    );
                    Ok(NO_RESPONSE_FALLBACK.to_string())
                }
                // Errores de proveedor (red, auth, timeout): se propagan.
                Err(err) => Err(anyhow!(err)),
            }
        }
        ref other => Err(anyhow!(
            "Proveedor LLM {:?} aún no implementado para chat",
            other
        )),
    }
}

/// Convierte el historial del endpoint al formato de Rig. El último mensaje
/// debe ser del usuario; los roles distintos de `user`/`assistant` se ignoran
/// (el preámbulo del agente ya fija el prompt de sistema).
pub(crate) fn to_rig_history(messages: &[ChatMessage]) -> Result<(Vec<Message>, String)> {
    let last = messages
        .last()
        .ok_or_else(|| anyhow!("El historial de mensajes está vacío"))?;
    if !last.role.eq_ignore_ascii_case("user") {
        return Err(anyhow!(
            "El último mensaje del historial debe ser del usuario (role=user)"
        ));
    }

    let mut history = Vec::new();
    for msg in &messages[..messages.len() - 1] {
        match msg.role.to_lowercase().as_str() {
            "user" => history.push(Message::user(msg.content.clone())),
            "assistant" => history.push(Message::assistant(msg.content.clone())),
            other => tracing::debug!("Ignorando mensaje con rol '{other}' en el historial"),
        }
    }

    Ok((history, last.content.clone()))
}

/// Validación previa del historial para que la capa HTTP pueda responder 400
/// sin iniciar el turno.
pub(crate) fn validate_history(messages: &[ChatMessage]) -> Result<()> {
    to_rig_history(messages).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn historial_vacio_es_invalido() {
        assert!(to_rig_history(&[]).is_err());
    }

    #[test]
    fn el_ultimo_mensaje_debe_ser_del_usuario() {
        let messages = vec![msg("user", "hola"), msg("assistant", "buenas")];
        assert!(to_rig_history(&messages).is_err());
    }

    #[test]
    fn convierte_turnos_previos_y_extrae_el_ultimo() {
        let messages = vec![
            msg("user", "primera pregunta"),
            msg("assistant", "primera respuesta"),
            msg("user", "segunda pregunta"),
        ];
        let (history, user_text) = to_rig_history(&messages).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(user_text, "segunda pregunta");
    }

    #[test]
    fn ignora_roles_system_y_tool_en_el_historial() {
        let messages = vec![
            msg("system", "eres un asistente"),
            msg("user", "pregunta"),
            msg("tool", "resultado de una herramienta"),
            msg("user", "otra pregunta"),
        ];
        let (history, user_text) = to_rig_history(&messages).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(user_text, "otra pregunta");
    }
}
