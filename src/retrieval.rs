//! Client side of the external similarity store.
//!
//! The store itself (embeddings, vector search) lives behind an HTTP service; this module only
//! speaks its JSON contract and shapes the results into a prompt block.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::chapters::store::{Chapter, ChapterStore};
use crate::textutil::paragraphs;

const MIN_PASSAGE_CHARS: usize = 10;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    /// File name of the chapter the passage came from.
    pub source: String,
    /// Cosine distance; similarity is `1 - distance`.
    pub distance: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
}

pub trait ContextRetriever {
    fn similar(&self, query: &str, k: usize, exclude_source: &str) -> Result<Vec<RetrievedPassage>>;

    fn indexed_sources(&self) -> Result<HashSet<String>>;

    fn index(&self, source: &str, passages: &[Passage]) -> Result<()>;
}

/// Paragraph chunks of a chapter, ids `{stem}-chunk-{i}`. Fragments of 10 characters or fewer
/// are dropped before numbering.
pub fn chunk_by_paragraph(stem: &str, text: &str) -> Vec<Passage> {
    paragraphs(text)
        .into_iter()
        .map(str::trim)
        .filter(|p| p.chars().count() > MIN_PASSAGE_CHARS)
        .enumerate()
        .map(|(i, p)| Passage {
            id: format!("{stem}-chunk-{i}"),
            text: p.to_string(),
        })
        .collect()
}

/// Indexes every chapter the store has not seen yet. Returns the number of chapters sent.
pub fn index_missing_chapters(
    retriever: &dyn ContextRetriever,
    store: &ChapterStore,
    chapters: &[Chapter],
) -> usize {
    let known = match retriever.indexed_sources() {
        Ok(s) => s,
        Err(err) => {
            tracing::error!("retrieval: cannot list indexed chapters, indexing skipped: {err:#}");
            return 0;
        }
    };
    let mut sent = 0usize;
    for ch in chapters.iter().filter(|c| !known.contains(&c.file_name)) {
        let text = match store.read_source(ch) {
            Ok(t) => t,
            Err(err) => {
                tracing::error!("retrieval: {}: {err:#}", ch.file_name);
                continue;
            }
        };
        let passages = chunk_by_paragraph(ch.stem(), &text);
        if passages.is_empty() {
            tracing::warn!(
                "retrieval: no passages longer than {MIN_PASSAGE_CHARS} chars in {}",
                ch.file_name
            );
            continue;
        }
        match retriever.index(&ch.file_name, &passages) {
            Ok(()) => {
                tracing::debug!("retrieval: indexed {} ({} passages)", ch.file_name, passages.len());
                sent += 1;
            }
            Err(err) => tracing::error!("retrieval: index {} failed: {err:#}", ch.file_name),
        }
    }
    tracing::info!(
        "retrieval: {sent} chapter(s) indexed, {} already present",
        known.len()
    );
    sent
}

pub fn render_passages(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| {
            format!(
                "### Context from {} (similarity: {:.2}):\n{}\n###",
                p.source,
                1.0 - p.distance,
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Rendered block of passages similar to `chapter_text`, `None` when nothing came back.
/// Service failures degrade to `None`.
pub fn retrieve_block(
    retriever: &dyn ContextRetriever,
    chapter_text: &str,
    k: usize,
    exclude_source: &str,
) -> Option<String> {
    if k == 0 {
        return None;
    }
    match retriever.similar(chapter_text, k, exclude_source) {
        Ok(passages) if passages.is_empty() => None,
        Ok(passages) => {
            tracing::debug!("retrieval: {} passage(s) for {exclude_source}", passages.len());
            Some(render_passages(&passages))
        }
        Err(err) => {
            tracing::error!("retrieval failed for {exclude_source}: {err:#}");
            None
        }
    }
}

pub struct HttpRetriever {
    base_url: String,
    client: Client,
}

impl HttpRetriever {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build retrieval HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl ContextRetriever for HttpRetriever {
    fn similar(&self, query: &str, k: usize, exclude_source: &str) -> Result<Vec<RetrievedPassage>> {
        let url = self.url("/v1/query");
        let resp = self
            .client
            .post(&url)
            .json(&QueryRequest {
                query,
                k,
                exclude_source,
            })
            .send()
            .with_context(|| format!("failed to call retriever at {url}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("retriever returned {}: {}", status, body);
        }
        let parsed: QueryResponse = resp.json().context("failed to parse retriever response")?;
        Ok(parsed.results)
    }

    fn indexed_sources(&self) -> Result<HashSet<String>> {
        let url = self.url("/v1/sources");
        let resp = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("failed to call retriever at {url}"))?;
        if !resp.status().is_success() {
            bail!("retriever returned {} for {url}", resp.status());
        }
        let parsed: SourcesResponse = resp.json().context("failed to parse source list")?;
        Ok(parsed.sources.into_iter().collect())
    }

    fn index(&self, source: &str, passages: &[Passage]) -> Result<()> {
        let url = self.url("/v1/index");
        let resp = self
            .client
            .post(&url)
            .json(&IndexRequest { source, passages })
            .send()
            .with_context(|| format!("failed to call retriever at {url}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("retriever returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    k: usize,
    exclude_source: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<RetrievedPassage>,
}

#[derive(Debug, Deserialize)]
struct SourcesResponse {
    #[serde(default)]
    sources: Vec<String>,
}

#[derive(Serialize)]
struct IndexRequest<'a> {
    source: &'a str,
    passages: &'a [Passage],
}
