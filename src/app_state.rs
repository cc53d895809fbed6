use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    config::AppConfig, guardrails::GuardrailStage, llm::LlmManager, vector_store::DocumentIndex,
};

/// Estado compartido del servidor. El índice y los guardarraíles se
/// construyen antes de aceptar tráfico y a partir de ahí son de sólo lectura;
/// los turnos concurrentes no comparten ningún estado mutable.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm_manager: LlmManager,
    pub index: Arc<DocumentIndex>,
    pub guardrails: Arc<GuardrailStage>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
