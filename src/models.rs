//! Modelos de dominio (documentos fuente, chunks y payloads de conversación).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadatos de un fichero fuente ya indexado. Se persisten junto al índice
/// y se exponen en el inventario de documentos de la API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub chunks: usize,
}

/// Documento fuente cargado en memoria durante la construcción del índice.
/// Inmutable una vez leído del disco.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Identificador de procedencia (ruta relativa al corpus).
    pub source: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
    pub text: String,
}

/// Trozo de texto de un documento: la unidad de recuperación.
/// Se crea una vez al construir el índice y nunca se muta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub index: usize,
    pub text: String,
}

/// Resultado de una búsqueda top-K sobre el índice.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub source: String,
    pub text: String,
    pub score: f64,
}

/// Mensaje de una conversación, etiquetado por rol ("user" | "assistant").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Payload de auditoría de confianza que acompaña a cada respuesta del
/// endpoint conversacional. El frontend lo renderiza tal cual.
#[derive(Debug, Clone, Serialize)]
pub struct TrustAudit {
    /// Puntuación global en [0, 1].
    pub trust_score: f64,
    pub summary: String,
    /// Puntuación por dimensión, cada una en [0, 1].
    pub dimensions: BTreeMap<String, f64>,
}
