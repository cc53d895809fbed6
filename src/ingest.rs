//! Carga de un directorio de documentos y troceado en chunks con solape,
//! listo para generar embeddings e indexar.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use mime_guess::MimeGuess;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::models::{Chunk, SourceDocument};

/// Extensiones de fichero que se consideran parte del corpus.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt", "pdf"];

/// Resumen de los resultados de una carga de corpus.
#[derive(Debug, Default)]
pub struct CorpusSummary {
    pub files_scanned: u32,
    pub files_loaded: u32,
    pub files_skipped: u32,
}

impl fmt::Display for CorpusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen del corpus: {} ficheros escaneados, {} cargados, {} omitidos.",
            self.files_scanned, self.files_loaded, self.files_skipped
        )
    }
}

/// Recorre recursivamente el directorio del corpus y carga los documentos
/// soportados. Un fichero ilegible se registra y se omite; un único fichero
/// problemático nunca aborta la carga completa.
pub fn load_documents(root: &Path) -> Result<(Vec<SourceDocument>, CorpusSummary)> {
    if !root.is_dir() {
        return Err(anyhow!(
            "La ruta del corpus no es un directorio: {}",
            root.display()
        ));
    }

    let mut documents = Vec::new();
    let mut summary = CorpusSummary::default();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        summary.files_scanned += 1;
        match load_file(root, entry.path()) {
            Ok(Some(doc)) => {
                summary.files_loaded += 1;
                documents.push(doc);
            }
            Ok(None) => summary.files_skipped += 1,
            Err(err) => {
                summary.files_skipped += 1;
                warn!("Error leyendo {}: {err}", entry.path().display());
            }
        }
    }

    info!("{summary}");
    Ok((documents, summary))
}

fn load_file(root: &Path, path: &Path) -> Result<Option<SourceDocument>> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(None);
    }

    let text = match extension.as_str() {
        "pdf" => match pdf_extract::extract_text(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "No se pudo extraer texto del PDF {}: {}. Saltando fichero.",
                    path.display(),
                    e
                );
                return Ok(None);
            }
        },
        _ => match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                warn!("Saltando fichero no-texto o no-UTF8: {}", path.display());
                return Ok(None);
            }
        },
    };

    let metadata = fs::metadata(path)?;
    let source = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source.clone());
    let mime_type = MimeGuess::from_path(path).first().map(|m| m.to_string());

    Ok(Some(SourceDocument {
        source,
        filename,
        mime_type,
        size_bytes: metadata.len(),
        text,
    }))
}

/// Trocea el texto de un documento en ventanas de como máximo `max_chars`
/// caracteres con un solape de `overlap` entre ventanas adyacentes, de modo
/// que el contexto que cruza un corte sea recuperable desde ambos chunks.
///
/// El final de cada ventana se retrae al límite de párrafo, frase o espacio
/// más cercano cuando existe uno en el tramo final de la ventana; si no hay
/// ninguno, se corta en seco. Invariante del llamante: `overlap < max_chars`.
pub fn split_into_chunks(source: &str, text: &str, max_chars: usize, overlap: usize) -> Vec<Chunk> {
    debug_assert!(overlap < max_chars);

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let len = text.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < len {
        let hard_end = floor_char_boundary(text, (start + max_chars).min(len));
        let end = if hard_end < len {
            snap_break(text, start, hard_end)
        } else {
            hard_end
        };

        chunks.push(Chunk {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            index,
            text: text[start..end].to_string(),
        });
        index += 1;

        if end >= len {
            break;
        }

        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next <= start {
            // Garantiza progreso aunque el retroceso por solape no avance.
            next = end;
        }
        start = next;
    }

    chunks
}

/// Busca, de mayor a menor preferencia, un límite de párrafo, frase o espacio
/// en la segunda mitad de la ventana `[start, hard_end)`. Devuelve la posición
/// de corte (después del separador) o `hard_end` si no hay ninguno.
fn snap_break(text: &str, start: usize, hard_end: usize) -> usize {
    let window = &text[start..hard_end];
    let min_cut = window.len() / 2;

    for sep in ["\n\n", ". ", "\n", " "] {
        if let Some(pos) = window.rfind(sep) {
            let cut = pos + sep.len();
            if cut > min_cut {
                return start + cut;
            }
        }
    }
    hard_end
}

/// Retrae un índice de byte al límite de carácter UTF-8 válido más cercano.
fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texto_vacio_no_produce_chunks() {
        assert!(split_into_chunks("doc.md", "", 100, 10).is_empty());
        assert!(split_into_chunks("doc.md", "   \n\n  ", 100, 10).is_empty());
    }

    #[test]
    fn texto_corto_produce_un_unico_chunk() {
        let chunks = split_into_chunks("doc.md", "Hola, mundo.", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hola, mundo.");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].source, "doc.md");
    }

    #[test]
    fn ningun_chunk_supera_el_maximo() {
        let text = "palabra ".repeat(200);
        for (max, overlap) in [(50, 0), (80, 10), (120, 60), (33, 7)] {
            let chunks = split_into_chunks("doc.md", &text, max, overlap);
            assert!(!chunks.is_empty());
            for c in &chunks {
                assert!(c.text.len() <= max, "chunk de {} > max {}", c.text.len(), max);
            }
        }
    }

    #[test]
    fn indices_contiguos_desde_cero() {
        let text = "frase corta. ".repeat(100);
        let chunks = split_into_chunks("doc.md", &text, 60, 12);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn solape_exacto_sin_separadores() {
        // Sin límites preferidos el corte es en seco y el solape es exacto:
        // los últimos `overlap` caracteres de un chunk abren el siguiente.
        let text = "a".repeat(500);
        let overlap = 20;
        let chunks = split_into_chunks("doc.md", &text, 100, overlap);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev = &pair[0].text;
            let next = &pair[1].text;
            assert_eq!(prev[prev.len() - overlap..], next[..overlap]);
        }
    }

    #[test]
    fn prefiere_cortar_en_limite_de_parrafo() {
        let parrafo = "x".repeat(70);
        let text = format!("{parrafo}\n\n{parrafo}\n\n{parrafo}");
        let chunks = split_into_chunks("doc.md", &text, 100, 0);
        // El primer corte cae tras el salto de párrafo, no en mitad del segundo.
        assert!(chunks[0].text.ends_with("\n\n"));
        assert!(chunks[0].text.starts_with(&parrafo));
    }

    #[test]
    fn no_parte_caracteres_multibyte() {
        let text = "ñ".repeat(300);
        let chunks = split_into_chunks("doc.md", &text, 101, 13);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().all(|ch| ch == 'ñ'));
        }
    }

    #[test]
    fn carga_de_corpus_omite_extensiones_no_soportadas() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("uno.md"), "# Documento uno").unwrap();
        fs::write(dir.path().join("dos.txt"), "Documento dos").unwrap();
        fs::write(dir.path().join("binario.bin"), [0u8, 159, 146, 150]).unwrap();

        let (docs, summary) = load_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(summary.files_scanned, 3);
        assert_eq!(summary.files_loaded, 2);
        assert_eq!(summary.files_skipped, 1);

        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert!(sources.contains(&"uno.md"));
        assert!(sources.contains(&"dos.txt"));
    }

    #[test]
    fn carga_de_corpus_falla_si_no_es_directorio() {
        assert!(load_documents(Path::new("/ruta/que/no/existe")).is_err());
    }
}
