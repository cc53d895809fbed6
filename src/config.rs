//! Carga y gestión de configuración de la aplicación (corpus + LLM + guardarraíles).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

/// Configuración completa de la aplicación.
///
/// Todas las opciones se leen del entorno una única vez en el arranque;
/// después de eso la configuración es de sólo lectura.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    /// Identificador de modelo que acepta el endpoint conversacional.
    pub served_model_id: String,

    pub llm_provider: LlmProvider,
    pub llm_api_key: String,
    /// URL base opcional para endpoints OpenAI-compatibles.
    pub llm_base_url: Option<String>,
    pub llm_chat_model: String,
    pub llm_embedding_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u64,

    /// Directorio con los documentos fuente del corpus.
    pub docs_dir: PathBuf,
    /// Directorio donde se persiste el índice vectorial.
    pub index_dir: PathBuf,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub retrieval_top_k: usize,

    /// Ruta opcional a la configuración JSON de guardarraíles.
    pub guardrail_config_path: Option<PathBuf>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        let served_model_id =
            env::var("SERVED_MODEL_ID").unwrap_or_else(|_| "docs-agent".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| anyhow!("Falta LLM_API_KEY (u OPENAI_API_KEY) en el entorno"))?;

        let llm_base_url = match env::var("LLM_BASE_URL") {
            Ok(s) if !s.trim().is_empty() => {
                Url::parse(&s).map_err(|e| anyhow!("LLM_BASE_URL no es una URL válida: {e}"))?;
                Some(s)
            }
            _ => None,
        };

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        let llm_temperature = parse_env("LLM_TEMPERATURE", 0.2_f64)?;
        let llm_max_tokens = parse_env("LLM_MAX_TOKENS", 300_u64)?;

        let docs_dir =
            PathBuf::from(env::var("RAG_DATA_DIR").unwrap_or_else(|_| "data/docs".to_string()));
        let index_dir =
            PathBuf::from(env::var("RAG_INDEX_DIR").unwrap_or_else(|_| "data/index".to_string()));
        let chunk_max_chars = parse_env("RAG_CHUNK_SIZE", 800_usize)?;
        let chunk_overlap_chars = parse_env("RAG_CHUNK_OVERLAP", 100_usize)?;
        let retrieval_top_k = parse_env("RAG_TOP_K", 3_usize)?;

        let guardrail_config_path = env::var("GUARDRAIL_CONFIG_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let cfg = Self {
            server_addr,
            served_model_id,
            llm_provider,
            llm_api_key,
            llm_base_url,
            llm_chat_model,
            llm_embedding_model,
            llm_temperature,
            llm_max_tokens,
            docs_dir,
            index_dir,
            chunk_max_chars,
            chunk_overlap_chars,
            retrieval_top_k,
            guardrail_config_path,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Valida los invariantes entre opciones. El solape debe ser estrictamente
    /// menor que el tamaño de chunk: `0 <= overlap < chunk_size`.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_max_chars == 0 {
            return Err(anyhow!("RAG_CHUNK_SIZE debe ser mayor que cero"));
        }
        if self.chunk_overlap_chars >= self.chunk_max_chars {
            return Err(anyhow!(
                "RAG_CHUNK_OVERLAP ({}) debe ser menor que RAG_CHUNK_SIZE ({})",
                self.chunk_overlap_chars,
                self.chunk_max_chars
            ));
        }
        if self.retrieval_top_k == 0 {
            return Err(anyhow!("RAG_TOP_K debe ser mayor que cero"));
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {name} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            server_addr: "127.0.0.1:8000".to_string(),
            served_model_id: "docs-agent".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_api_key: "sk-test".to_string(),
            llm_base_url: None,
            llm_chat_model: "gpt-4o-mini".to_string(),
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_temperature: 0.2,
            llm_max_tokens: 300,
            docs_dir: PathBuf::from("data/docs"),
            index_dir: PathBuf::from("data/index"),
            chunk_max_chars: 800,
            chunk_overlap_chars: 100,
            retrieval_top_k: 3,
            guardrail_config_path: None,
        }
    }

    #[test]
    fn config_valida_pasa() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn solape_mayor_o_igual_que_chunk_falla() {
        let mut cfg = base_config();
        cfg.chunk_overlap_chars = 800;
        assert!(cfg.validate().is_err());

        cfg.chunk_overlap_chars = 900;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn chunk_cero_falla() {
        let mut cfg = base_config();
        cfg.chunk_max_chars = 0;
        cfg.chunk_overlap_chars = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn top_k_cero_falla() {
        let mut cfg = base_config();
        cfg.retrieval_top_k = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn proveedor_desde_cadena() {
        assert_eq!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI);
        assert_eq!(LlmProvider::from_str("ollama").unwrap(), LlmProvider::Ollama);
        assert!(LlmProvider::from_str("cohere").is_err());
    }
}
