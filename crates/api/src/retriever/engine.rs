//! In-process knowledge store.
//!
//! A deliberately small retrieval store that drives the full pipeline:
//! parse → chunk → embed (through the configured embedding provider, and
//! therefore through the batch scheduler for the local backend) → persist.
//! Queries embed the question, rank stored chunks by cosine similarity over
//! a linear scan, and prompt the LLM provider with the assembled context.
//!
//! Entity/relation extraction is produced by external tooling; this store
//! only reads the KV/graph files for the readout surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

use mica_inference::{ChatMessage, CompletionOptions, EmbedParams, Embedder, LlmCompleter};

use super::json_kv::{JsonGraphReader, JsonKvReader};
use super::{
    GraphReader, KvReader, MultimodalItem, ParseMethod, QueryMode, QueryOptions, Retriever,
    RetrieverBuilder,
};

const DEFAULT_CHUNK_SIZE: usize = 1200;
const DEFAULT_TOP_K: usize = 5;

/// Text extraction seam. Real parsing of complex formats is external; this
/// trait is the boundary the store consumes.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(
        &self,
        file_path: &Path,
        output_dir: &Path,
        method: ParseMethod,
    ) -> Result<String>;
}

/// Default parser: plain text and markdown are read directly; PDFs go
/// through the extraction library. Everything else is unsupported here and
/// surfaces as a processing failure.
pub struct BasicParser;

#[async_trait]
impl DocumentParser for BasicParser {
    async fn parse(
        &self,
        file_path: &Path,
        _output_dir: &Path,
        method: ParseMethod,
    ) -> Result<String> {
        let extension = file_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if method == ParseMethod::Txt || matches!(extension.as_str(), "txt" | "md" | "markdown") {
            return tokio::fs::read_to_string(file_path)
                .await
                .with_context(|| format!("reading {}", file_path.display()));
        }

        if extension == "pdf" {
            let path = file_path.to_path_buf();
            return tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text(&path).map_err(|e| {
                    anyhow::anyhow!("extracting text from {}: {e}", path.display())
                })
            })
            .await
            .context("pdf extraction task failed")?;
        }

        bail!("unsupported document format: .{extension}");
    }
}

/// Split text into sentence-aligned chunks of at most `chunk_size` bytes.
/// Sentences longer than the bound (run-ons, URLs, code lines) are split on
/// word boundaries, falling back to character splitting.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let sentences: Vec<&str> = text
        .unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if sentence.len() > chunk_size {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            chunks.extend(split_long_sentence(sentence, chunk_size));
            continue;
        }

        if current.len() + sentence.len() + 1 > chunk_size && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = String::new();
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Split a long sentence into smaller chunks, preferring word boundaries.
fn split_long_sentence(sentence: &str, max_size: usize) -> Vec<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();

    if words.is_empty() {
        return split_by_chars(sentence, max_size);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in words {
        // A single word beyond the bound (a URL, an identifier) is split by
        // characters.
        if word.len() > max_size {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            chunks.extend(split_by_chars(word, max_size));
            continue;
        }

        let new_len = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };

        if new_len > max_size && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = String::new();
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Split text by character count, respecting Unicode grapheme boundaries.
fn split_by_chars(text: &str, max_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();

    chars
        .chunks(max_size)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRecord {
    doc_name: String,
    index: usize,
    content: String,
    vector: Vec<f32>,
}

/// The in-process knowledge store.
pub struct LocalKnowledgeStore {
    working_dir: PathBuf,
    parser: Arc<dyn DocumentParser>,
    llm: Arc<dyn LlmCompleter>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    write_lock: tokio::sync::Mutex<()>,
    doc_status: JsonKvReader,
    entities: JsonKvReader,
    relations: JsonKvReader,
    graph: JsonGraphReader,
}

impl LocalKnowledgeStore {
    pub async fn open(
        working_dir: &Path,
        parser: Arc<dyn DocumentParser>,
        llm: Arc<dyn LlmCompleter>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(working_dir.join("parsed_output"))
            .await
            .with_context(|| format!("creating working directory {}", working_dir.display()))?;

        Ok(Self {
            working_dir: working_dir.to_path_buf(),
            parser,
            llm,
            embedder,
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_lock: tokio::sync::Mutex::new(()),
            doc_status: JsonKvReader::new(working_dir, "doc_status"),
            entities: JsonKvReader::new(working_dir, "full_entities"),
            relations: JsonKvReader::new(working_dir, "full_relations"),
            graph: JsonGraphReader::new(working_dir),
        })
    }

    fn chunks_path(&self) -> PathBuf {
        self.working_dir.join("chunks.json")
    }

    async fn load_chunks(&self) -> Result<Vec<ChunkRecord>> {
        match tokio::fs::read(self.chunks_path()).await {
            Ok(raw) => serde_json::from_slice(&raw).context("parsing chunk store"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).context("reading chunk store"),
        }
    }

    async fn save_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let raw = serde_json::to_vec(chunks).context("serializing chunk store")?;
        tokio::fs::write(self.chunks_path(), raw)
            .await
            .context("writing chunk store")
    }

    async fn mark_processed(&self, doc_name: &str, file_path: &Path, chunks: usize) -> Result<()> {
        let mut statuses = self.doc_status.list().await?;
        statuses.insert(
            format!("doc-{doc_name}"),
            json!({
                "file_path": file_path.to_string_lossy(),
                "status": "PROCESSED",
                "chunks": chunks,
                "processed_at": Utc::now().to_rfc3339(),
            }),
        );
        let raw = serde_json::to_vec(&statuses).context("serializing doc status")?;
        tokio::fs::write(self.doc_status.path(), raw)
            .await
            .context("writing doc status")
    }

    async fn retrieve_context(&self, query: &str, top_k: usize) -> Result<String> {
        // Retrieval pipelines attach scheduling hints; providers ignore
        // what they do not understand.
        let mut params = EmbedParams::new();
        params.insert("_priority".to_string(), json!(5));

        let query_rows = self
            .embedder
            .embed(vec![query.to_string()], &params)
            .await
            .map_err(|e| anyhow::anyhow!("query embedding failed: {e}"))?;
        let Some(query_vector) = query_rows.first() else {
            bail!("embedding provider returned no vector for the query");
        };

        let chunks = self.load_chunks().await?;
        let mut scored: Vec<(f32, &ChunkRecord)> = chunks
            .iter()
            .map(|chunk| (cosine_similarity(query_vector, &chunk.vector), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let context = scored
            .iter()
            .take(top_k)
            .map(|(_, chunk)| format!("[{}] {}", chunk.doc_name, chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        debug!(
            candidates = chunks.len(),
            selected = top_k.min(chunks.len()),
            "assembled query context"
        );
        Ok(context)
    }

    fn completion_options(opts: &QueryOptions) -> CompletionOptions {
        CompletionOptions {
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        }
    }
}

#[async_trait]
impl Retriever for LocalKnowledgeStore {
    async fn process_document(
        &self,
        file_path: &Path,
        output_dir: &Path,
        parse_method: ParseMethod,
    ) -> Result<()> {
        let doc_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string_lossy().into_owned());

        let text = self.parser.parse(file_path, output_dir, parse_method).await?;
        let contents = chunk_text(&text, self.chunk_size);
        if contents.is_empty() {
            bail!("document produced no text content");
        }

        let vectors = self
            .embedder
            .embed(contents.clone(), &EmbedParams::new())
            .await
            .map_err(|e| anyhow::anyhow!("chunk embedding failed: {e}"))?;
        if vectors.len() != contents.len() {
            bail!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                contents.len()
            );
        }

        let records: Vec<ChunkRecord> = contents
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (content, vector))| ChunkRecord {
                doc_name: doc_name.clone(),
                index,
                content,
                vector,
            })
            .collect();
        let chunk_count = records.len();

        // Reprocessing replaces the document's previous chunks.
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_chunks().await?;
        all.retain(|chunk| chunk.doc_name != doc_name);
        all.extend(records);
        self.save_chunks(&all).await?;
        self.mark_processed(&doc_name, file_path, chunk_count).await?;

        info!(doc = %doc_name, chunks = chunk_count, "document indexed");
        Ok(())
    }

    async fn query(&self, query: &str, mode: QueryMode, opts: &QueryOptions) -> Result<Value> {
        let top_k = opts.top_k.unwrap_or(DEFAULT_TOP_K);
        // Graph-aware modes need the external graph tooling; every mode
        // reduces to vector retrieval in this store.
        let context = self.retrieve_context(query, top_k).await?;

        let prompt = if context.is_empty() {
            format!(
                "No documents are indexed yet. Answer from general knowledge and say so.\n\n\
                 ---Question---\n{query}"
            )
        } else {
            format!("---Context---\n{context}\n\n---Question---\n{query}")
        };

        let system = format!(
            "You answer questions about an indexed document collection \
             (retrieval mode: {}). Ground your answer in the provided context.",
            mode.as_str()
        );

        let history: Vec<ChatMessage> = opts.conversation_history.clone();
        let answer = self
            .llm
            .complete(
                &prompt,
                Some(&system),
                &history,
                &Self::completion_options(opts),
            )
            .await
            .map_err(|e| anyhow::anyhow!("completion failed: {e}"))?;

        Ok(Value::String(answer))
    }

    async fn query_with_multimodal(
        &self,
        query: &str,
        items: &[MultimodalItem],
        mode: QueryMode,
        opts: &QueryOptions,
    ) -> Result<Value> {
        let mut augmented = query.to_string();
        for item in items {
            match item.item_type.as_str() {
                "image" => {
                    if let Some(path) = &item.img_path {
                        augmented.push_str(&format!("\n[Image Path: {path}]"));
                    }
                    if let Some(caption) = &item.image_caption {
                        augmented.push_str(&format!("\n[Image Caption: {caption}]"));
                    }
                }
                "table" => {
                    if let Some(caption) = &item.table_caption {
                        augmented.push_str(&format!("\n[Table: {caption}]"));
                    }
                    if let Some(data) = &item.table_data {
                        augmented.push_str(&format!("\n{data}"));
                    }
                }
                "equation" => {
                    if let Some(latex) = &item.latex {
                        augmented.push_str(&format!("\n[Equation: {latex}]"));
                    }
                    if let Some(caption) = &item.equation_caption {
                        augmented.push_str(&format!("\n[Equation Caption: {caption}]"));
                    }
                }
                other => debug!(item_type = other, "ignoring unknown multimodal item type"),
            }
        }

        self.query(&augmented, mode, opts).await
    }

    fn doc_status(&self) -> &dyn KvReader {
        &self.doc_status
    }

    fn entities(&self) -> &dyn KvReader {
        &self.entities
    }

    fn relations(&self) -> &dyn KvReader {
        &self.relations
    }

    fn graph(&self) -> &dyn GraphReader {
        &self.graph
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Builds the in-process store from the configured providers.
pub struct LocalStoreBuilder {
    pub working_dir: PathBuf,
    pub parser: Arc<dyn DocumentParser>,
    pub llm: Arc<dyn LlmCompleter>,
    pub embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl RetrieverBuilder for LocalStoreBuilder {
    async fn build(&self) -> Result<Arc<dyn Retriever>> {
        let store = LocalKnowledgeStore::open(
            &self.working_dir,
            Arc::clone(&self.parser),
            Arc::clone(&self.llm),
            Arc::clone(&self.embedder),
        )
        .await?;
        Ok(Arc::new(store))
    }
}
