//! Índice vectorial local sobre los chunks del corpus.
//!
//! API pública:
//!   - `DocumentIndex::open_or_build(&IndexConfig, embedder)`
//!   - `DocumentIndex::query(&str, usize)`.
//!
//! El índice se construye (o se carga de disco) una única vez en el arranque
//! y es de sólo lectura durante toda la vida del proceso. La carga del índice
//! persistido es el único punto donde un error se absorbe deliberadamente:
//! cualquier fallo ahí dispara una reconstrucción completa.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::ingest;
use crate::llm::TextEmbedder;
use crate::models::{Chunk, RetrievedChunk, SourceInfo};

const INDEX_FILE: &str = "index.json";
const INDEX_FORMAT_VERSION: u32 = 1;

/// Chunk persistido junto a su vector de embedding. El vector nunca sale
/// de este módulo.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    #[serde(flatten)]
    chunk: Chunk,
    embedding: Vec<f64>,
}

/// Forma en disco del índice. El header la hace autodescriptiva: permite
/// detectar en la carga un índice incompatible (otro proveedor, otro modelo
/// de embeddings u otra dimensión) y tratarlo como "no cargable".
#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    provider: String,
    embedding_model: String,
    dimensions: usize,
    created_at: String,
    sources: Vec<SourceInfo>,
    chunks: Vec<StoredChunk>,
}

/// Parámetros de construcción del índice, tomados de la configuración.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl IndexConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            docs_dir: cfg.docs_dir.clone(),
            index_dir: cfg.index_dir.clone(),
            chunk_max_chars: cfg.chunk_max_chars,
            chunk_overlap_chars: cfg.chunk_overlap_chars,
        }
    }
}

/// Índice de similitud sobre los chunks del corpus con sus embeddings.
pub struct DocumentIndex {
    chunks: Vec<StoredChunk>,
    sources: Vec<SourceInfo>,
    dimensions: usize,
    embedder: Arc<dyn TextEmbedder>,
}

impl DocumentIndex {
    /// Intenta cargar el índice persistido y, si no es posible, lo
    /// reconstruye desde el corpus y lo persiste. La carga es el camino
    /// rápido: no relee documentos ni vuelve a llamar al proveedor de
    /// embeddings.
    pub async fn open_or_build(
        cfg: &IndexConfig,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self> {
        let index_path = cfg.index_dir.join(INDEX_FILE);
        match Self::load(&index_path, &embedder) {
            Ok(index) => {
                info!(
                    "Índice vectorial cargado de {} ({} chunks).",
                    index_path.display(),
                    index.len()
                );
                return Ok(index);
            }
            Err(err) => {
                warn!(
                    "No se pudo cargar el índice persistido ({err}); se reconstruirá desde {}.",
                    cfg.docs_dir.display()
                );
            }
        }
        Self::build(cfg, embedder).await
    }

    fn load(path: &Path, embedder: &Arc<dyn TextEmbedder>) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer {}", path.display()))?;
        let persisted: PersistedIndex =
            serde_json::from_str(&data).context("el índice persistido está corrupto")?;

        if persisted.version != INDEX_FORMAT_VERSION {
            return Err(anyhow!(
                "versión de formato {} no soportada (se esperaba {})",
                persisted.version,
                INDEX_FORMAT_VERSION
            ));
        }
        if persisted.provider != embedder.provider_name()
            || persisted.embedding_model != embedder.model_name()
        {
            return Err(anyhow!(
                "el índice fue creado con {}/{} y la configuración actual usa {}/{}",
                persisted.provider,
                persisted.embedding_model,
                embedder.provider_name(),
                embedder.model_name()
            ));
        }
        if persisted
            .chunks
            .iter()
            .any(|c| c.embedding.len() != persisted.dimensions)
        {
            return Err(anyhow!(
                "dimensión de embedding inconsistente en el índice persistido"
            ));
        }

        Ok(Self {
            chunks: persisted.chunks,
            sources: persisted.sources,
            dimensions: persisted.dimensions,
            embedder: embedder.clone(),
        })
    }

    async fn build(cfg: &IndexConfig, embedder: Arc<dyn TextEmbedder>) -> Result<Self> {
        let (documents, _summary) = ingest::load_documents(&cfg.docs_dir)?;

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut sources = Vec::new();
        for doc in &documents {
            let doc_chunks = ingest::split_into_chunks(
                &doc.source,
                &doc.text,
                cfg.chunk_max_chars,
                cfg.chunk_overlap_chars,
            );
            if doc_chunks.is_empty() {
                warn!("Fichero vacío o sin texto útil: {}", doc.source);
                continue;
            }
            sources.push(SourceInfo {
                source: doc.source.clone(),
                filename: doc.filename.clone(),
                mime_type: doc.mime_type.clone(),
                size_bytes: doc.size_bytes,
                chunks: doc_chunks.len(),
            });
            chunks.extend(doc_chunks);
        }

        info!(
            "Corpus troceado en {} chunks de {} documentos; generando embeddings...",
            chunks.len(),
            sources.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_texts(texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                vectors.len(),
                chunks.len()
            ));
        }
        let dimensions = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dimensions) {
            return Err(anyhow!(
                "el proveedor devolvió embeddings de dimensión variable"
            ));
        }

        let stored = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| StoredChunk { chunk, embedding })
            .collect();

        let index = Self {
            chunks: stored,
            sources,
            dimensions,
            embedder,
        };
        index.persist(&cfg.index_dir)?;
        info!(
            "Índice vectorial construido y persistido en {} ({} chunks).",
            cfg.index_dir.display(),
            index.len()
        );
        Ok(index)
    }

    /// Escritura en dos pasos (fichero temporal + rename) para no dejar nunca
    /// un index.json a medias. Ante dos primeros arranques simultáneos gana
    /// el último escritor.
    fn persist(&self, index_dir: &Path) -> Result<()> {
        fs::create_dir_all(index_dir)
            .with_context(|| format!("no se pudo crear {}", index_dir.display()))?;

        let persisted = PersistedIndex {
            version: INDEX_FORMAT_VERSION,
            provider: self.embedder.provider_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            dimensions: self.dimensions,
            created_at: Utc::now().to_rfc3339(),
            sources: self.sources.clone(),
            chunks: self.chunks.clone(),
        };
        let data = serde_json::to_string(&persisted)?;

        let tmp = index_dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, index_dir.join(INDEX_FILE))?;
        Ok(())
    }

    /// Busca los `k` chunks más similares a la consulta, en orden de
    /// similitud descendente. El embedding de la consulta se calcula en cada
    /// llamada; un índice vacío devuelve una secuencia vacía, no un error.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self.embedder.embed_texts(vec![text.to_string()]).await?;
        let query_vec = vectors
            .pop()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("No se pudo generar el embedding de la consulta"))?;

        let mut scored: Vec<(f64, &StoredChunk)> = self
            .chunks
            .iter()
            .map(|c| (cosine_similarity(&query_vec, &c.embedding), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, c)| RetrievedChunk {
                source: c.chunk.source.clone(),
                text: c.chunk.text.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
