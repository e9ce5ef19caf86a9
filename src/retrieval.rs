//! Local context retrieval over learning data and past conversations.
//!
//! [`LocalIndex`] is built once at startup from `learning_data/*.txt` and the
//! stored chat files. Documents are cut into overlapping chunks, each chunk
//! is embedded as an L2-normalized hashed term-frequency vector and queries
//! are ranked by cosine similarity.
//!
//! ```text
//! text → chunks → lowercase terms → hashed buckets → L2-normalize → f32[DIM]
//! ```

use std::path::Path;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::llm::message::Role;
use crate::session::store::parse_session_json;

/// Embedding dimensions.
pub const EMBEDDING_DIM: usize = 384;

/// A retrieved piece of text with its origin and similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    /// File name for learning data, `chat_{stem}` for conversations.
    pub source: String,
    pub score: f32,
}

/// Supplies prompt context for a question.
///
/// Callers treat failures as "no context"; retrieval never fails a request.
pub trait ContextRetriever: Send + Sync {
    fn retrieve(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of indexed chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A source document before chunking.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source: String,
}

struct IndexedChunk {
    text: String,
    source: String,
    vector: Vec<f32>,
}

/// In-memory index of embedded chunks.
pub struct LocalIndex {
    chunks: Vec<IndexedChunk>,
}

impl std::fmt::Debug for LocalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIndex")
            .field("chunks", &self.chunks.len())
            .field("dim", &EMBEDDING_DIM)
            .finish()
    }
}

impl LocalIndex {
    /// Index the given documents.
    pub fn from_documents(docs: &[Document], chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunks: Vec<IndexedChunk> = docs
            .iter()
            .flat_map(|doc| {
                split_text(&doc.text, chunk_size, chunk_overlap)
                    .into_iter()
                    .map(|text| IndexedChunk {
                        vector: embed(&text),
                        text,
                        source: doc.source.clone(),
                    })
            })
            .collect();
        tracing::info!(
            documents = docs.len(),
            chunks = chunks.len(),
            chunk_size,
            chunk_overlap,
            "retrieval index built"
        );
        Self { chunks }
    }

    /// Build from the learning-data directory and the chats directory.
    ///
    /// Unreadable files are logged and skipped.
    pub fn build(config: &RetrievalConfig, chats_dir: &Path) -> Self {
        let mut docs = load_learning_data(&config.learning_data_dir);
        let learning = docs.len();
        docs.extend(load_chat_transcripts(chats_dir));
        tracing::info!(
            learning,
            chats = docs.len() - learning,
            "loaded retrieval documents"
        );
        Self::from_documents(&docs, config.chunk_size, config.chunk_overlap)
    }
}

impl ContextRetriever for LocalIndex {
    fn retrieve(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = embed(question);
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .map(|c| ScoredChunk {
                text: c.text.clone(),
                source: c.source.clone(),
                score: cosine_similarity(&query, &c.vector),
            })
            .filter(|c| c.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Read every non-empty `*.txt` file in `dir`, sorted by name.
pub fn load_learning_data(dir: &Path) -> Vec<Document> {
    sorted_files(dir, "txt")
        .into_iter()
        .filter_map(|path| match std::fs::read_to_string(&path) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let source = file_name(&path);
                tracing::debug!(file = %source, chars = text.len(), "loaded learning data");
                Some(Document {
                    text: text.to_owned(),
                    source,
                })
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read learning data");
                None
            }
        })
        .collect()
}

/// Render every stored chat as `User: ...` / `Assistant: ...` lines.
pub fn load_chat_transcripts(dir: &Path) -> Vec<Document> {
    sorted_files(dir, "json")
        .into_iter()
        .filter_map(|path| {
            let turns = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|t| parse_session_json(&t).map_err(|e| e.to_string()));
            let turns = match turns {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not read chat history");
                    return None;
                }
            };
            let text = turns
                .iter()
                .map(|t| match t.role {
                    Role::User => format!("User: {}", t.content),
                    _ => format!("Assistant: {}", t.content),
                })
                .collect::<Vec<_>>()
                .join("\n");
            if text.trim().is_empty() {
                return None;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Some(Document {
                text,
                source: format!("chat_{stem}"),
            })
        })
        .collect()
}

fn sorted_files(dir: &Path, extension: &str) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split text into chunks of at most `size` characters on word boundaries,
/// carrying up to `overlap` trailing characters into the next chunk.
///
/// A single word longer than `size` becomes its own chunk.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for word in words {
        let added = word.chars().count() + usize::from(!current.is_empty());
        if current_len + added > size && !current.is_empty() {
            chunks.push(current.join(" "));

            // Keep a tail of whole words no longer than `overlap`.
            let mut tail: Vec<&str> = Vec::new();
            let mut tail_len = 0;
            for w in current.iter().rev() {
                let len = w.chars().count() + usize::from(!tail.is_empty());
                if tail_len + len > overlap {
                    break;
                }
                tail_len += len;
                tail.push(w);
            }
            tail.reverse();
            current = tail;
            current_len = tail_len;
        }
        current_len += word.chars().count() + usize::from(!current.is_empty());
        current.push(word);
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
}

/// FNV-1a, stable across runs and platforms.
fn bucket(term: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in term.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % EMBEDDING_DIM as u64) as usize
}

/// Hashed term-frequency embedding, L2-normalized.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for term in terms(text) {
        vector[bucket(&term)] += 1.0;
    }
    l2_normalize(&vector)
}

fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-12 {
        return vec.to_vec();
    }
    vec.iter().map(|x| x / norm).collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; zero when either vector is empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}
