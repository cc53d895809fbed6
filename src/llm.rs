//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa la familia OpenAI-compatible (incluye endpoints
//! alternativos vía `LLM_BASE_URL`); Gemini/Ollama quedan preparados para el
//! futuro.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use rig::providers::openai;

use crate::config::{AppConfig, LlmProvider};

/// Capacidad mínima que el índice necesita de un proveedor de embeddings:
/// mapear una lista de textos a vectores de dimensión fija.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
}

/// Gestor de LLMs y embeddings. El proveedor se resuelve una única vez en el
/// arranque; todo el código que necesita hablar con el modelo pasa por aquí.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    api_key: String,
    base_url: Option<String>,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
            api_key: cfg.llm_api_key.clone(),
            base_url: cfg.llm_base_url.clone(),
        })
    }

    /// Cliente OpenAI de Rig. Con `LLM_BASE_URL` configurada apunta a un
    /// endpoint OpenAI-compatible en lugar de a api.openai.com.
    pub(crate) fn openai_client(&self) -> Result<openai::Client> {
        let mut builder = openai::Client::builder(&self.api_key);
        if let Some(base) = &self.base_url {
            builder = builder.base_url(base);
        }
        Ok(builder.build())
    }

    /// Nombre efectivo del modelo de chat (config o default).
    pub(crate) fn chat_model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai::TEXT_EMBEDDING_3_SMALL;

        let client = self.openai_client()?;

        // Modelo de embeddings: config o default
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        // Embeddings en bloque (.embed_texts viene de EmbeddingModel)
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .context("Fallo llamando al proveedor de embeddings")?;

        if embeddings.len() != expected {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            ));
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

#[async_trait]
impl TextEmbedder for LlmManager {
    /// Calcula embeddings para una lista de textos.
    ///
    /// Nota: sólo implementado para OpenAI. Para otros proveedores
    /// se podrían añadir ramas adicionales al `match`.
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    fn provider_name(&self) -> &str {
        self.provider.as_str()
    }

    fn model_name(&self) -> &str {
        &self.embedding_model
    }
}
