//! Herramienta de recuperación (`lookup_docs`) expuesta al agente
//! conversacional a través del sistema de tools de Rig.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::models::RetrievedChunk;
use crate::vector_store::DocumentIndex;

/// Presupuesto fijo de caracteres por fragmento al formatear resultados,
/// para acotar el tamaño del prompt.
const SNIPPET_MAX_CHARS: usize = 500;
/// Separador visible entre resultados.
const RESULT_SEPARATOR: &str = "\n\n---\n";

/// Contadores de un único turno. La herramienta los incrementa y el pipeline
/// los lee al final para construir el payload de auditoría.
#[derive(Debug, Default)]
pub struct TurnMetrics {
    pub lookups: AtomicUsize,
    pub retrieved_chunks: AtomicUsize,
}

#[derive(Debug, Deserialize)]
pub struct LookupArgs {
    pub query: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupDocsError {
    #[error("fallo de recuperación: {0}")]
    Retrieval(String),
}

/// Capacidad invocable por el agente: busca en el índice local y devuelve
/// los mejores fragmentos con su fuente. Sólo lee el índice, nunca lo muta.
pub struct LookupDocs {
    index: Arc<DocumentIndex>,
    top_k: usize,
    metrics: Arc<TurnMetrics>,
}

impl LookupDocs {
    pub fn new(index: Arc<DocumentIndex>, top_k: usize, metrics: Arc<TurnMetrics>) -> Self {
        Self {
            index,
            top_k,
            metrics,
        }
    }
}

impl Tool for LookupDocs {
    const NAME: &'static str = "lookup_docs";

    type Error = LookupDocsError;
    type Args = LookupArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description:
                "Search the local documentation and return the most relevant snippets with their sources."
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Free-text query to search the documentation for."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let started = Instant::now();
        self.metrics.lookups.fetch_add(1, Ordering::Relaxed);

        let results = self
            .index
            .query(&args.query, self.top_k)
            .await
            .map_err(|e| LookupDocsError::Retrieval(e.to_string()))?;

        self.metrics
            .retrieved_chunks
            .fetch_add(results.len(), Ordering::Relaxed);
        info!(
            "Recuperados {} fragmentos en {:?} para '{}'",
            results.len(),
            started.elapsed(),
            truncate_chars(&args.query, 50)
        );

        Ok(format_results(&results))
    }
}

/// Formatea cada resultado como `[fuente]\ntexto` y une el conjunto con un
/// separador visible. Una búsqueda sin resultados devuelve la cadena vacía;
/// el agente la trata como "nada encontrado".
pub(crate) fn format_results(results: &[RetrievedChunk]) -> String {
    results
        .iter()
        .map(|r| format!("[{}]\n{}", r.source, truncate_chars(&r.text, SNIPPET_MAX_CHARS)))
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            source: source.to_string(),
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn sin_resultados_devuelve_cadena_vacia() {
        assert_eq!(format_results(&[]), "");
    }

    #[test]
    fn formatea_fuente_y_texto_con_separador() {
        let results = vec![chunk("guia.md", "Primera parte."), chunk("faq.md", "Segunda parte.")];
        let formatted = format_results(&results);
        assert_eq!(
            formatted,
            "[guia.md]\nPrimera parte.\n\n---\n[faq.md]\nSegunda parte."
        );
    }

    #[test]
    fn trunca_fragmentos_largos_con_elipsis() {
        let long_text = "x".repeat(SNIPPET_MAX_CHARS + 100);
        let formatted = format_results(&[chunk("doc.md", &long_text)]);
        assert!(formatted.ends_with("..."));
        assert_eq!(
            formatted.len(),
            "[doc.md]\n".len() + SNIPPET_MAX_CHARS + "...".len()
        );
    }

    #[test]
    fn no_trunca_fragmentos_dentro_del_presupuesto() {
        let text = "y".repeat(SNIPPET_MAX_CHARS);
        let formatted = format_results(&[chunk("doc.md", &text)]);
        assert!(!formatted.ends_with("..."));
        assert!(formatted.contains(&text));
    }
}
