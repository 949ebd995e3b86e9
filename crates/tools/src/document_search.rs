//! Document search over the IT knowledge base.
//!
//! Markdown files under the documents directory are split into chunks on
//! headings and paragraphs, then ranked lexically against the query. File
//! names decide the document kind: `policy` marks a policy document,
//! `troubleshoot` or `guide` marks a troubleshooting guide.

use async_trait::async_trait;
use deskloop_core::error::ToolError;
use deskloop_core::tool::{Tool, ToolResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Policy,
    Troubleshooting,
    Other,
}

impl DocumentKind {
    fn from_file_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("policy") {
            Self::Policy
        } else if name.contains("troubleshoot") || name.contains("guide") {
            Self::Troubleshooting
        } else {
            Self::Other
        }
    }
}

/// Which slice of the knowledge base a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Policy,
    Troubleshooting,
    All,
}

impl SearchScope {
    fn admits(self, kind: DocumentKind) -> bool {
        match self {
            Self::Policy => kind == DocumentKind::Policy,
            Self::Troubleshooting => kind == DocumentKind::Troubleshooting,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    source: String,
    kind: DocumentKind,
    text: String,
    lowered: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub source: String,
    pub kind: DocumentKind,
    pub content: String,
    pub score: f32,
}

/// Read-only chunk index, built once at startup.
#[derive(Debug, Default)]
pub struct DocumentIndex {
    chunks: Vec<Chunk>,
    top_k: usize,
}

impl DocumentIndex {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            top_k: 3,
        }
    }

    /// Index every `.md` file under `dir`, recursively. A missing directory
    /// yields an empty index; unreadable entries are logged and skipped.
    pub fn load(dir: &Path, chunk_size: usize, top_k: usize) -> Self {
        let mut index = Self {
            chunks: Vec::new(),
            top_k: top_k.max(1),
        };

        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Documents directory not found, search tools will return nothing");
            return index;
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable documents entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|e| e.eq_ignore_ascii_case("md")))
            .collect();
        files.sort();

        for path in files {
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable document");
                    continue;
                }
            };
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(file = %path.display(), "Document is not valid UTF-8, indexing lossily");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            index.add_document(&source, &text, chunk_size);
        }

        tracing::info!(
            dir = %dir.display(),
            chunks = index.chunks.len(),
            "Document index loaded"
        );
        index
    }

    /// Chunk and add one document.
    pub fn add_document(&mut self, source: &str, text: &str, chunk_size: usize) {
        let kind = DocumentKind::from_file_name(source);
        for piece in chunk_markdown(text, chunk_size.max(1)) {
            self.chunks.push(Chunk {
                source: source.to_string(),
                kind,
                lowered: piece.to_lowercase(),
                text: piece,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Best `top_k` chunks for `query` within `scope`. A scoped search with
    /// no hits falls back to the whole index.
    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<SearchHit> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let hits = self.rank(&terms, scope);
        if hits.is_empty() && scope != SearchScope::All {
            return self.rank(&terms, SearchScope::All);
        }
        hits
    }

    fn rank(&self, terms: &[String], scope: SearchScope) -> Vec<SearchHit> {
        let mut scored: Vec<(f32, &Chunk)> = self
            .chunks
            .iter()
            .filter(|c| scope.admits(c.kind))
            .filter_map(|c| {
                let score = score_chunk(&c.lowered, terms);
                (score > 0.0).then_some((score, c))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_k);

        scored
            .into_iter()
            .map(|(score, c)| SearchHit {
                source: c.source.clone(),
                kind: c.kind,
                content: c.text.clone(),
                score,
            })
            .collect()
    }
}

/// Lowercased, de-duplicated query terms of two or more characters.
fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() < 2 {
            continue;
        }
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Distinct matched terms dominate; repeated occurrences break ties.
fn score_chunk(lowered: &str, terms: &[String]) -> f32 {
    let mut distinct = 0u32;
    let mut total = 0usize;
    for term in terms {
        let n = lowered.matches(term.as_str()).count();
        if n > 0 {
            distinct += 1;
            total += n;
        }
    }
    if distinct == 0 {
        return 0.0;
    }
    distinct as f32 + (1.0 + total as f32).ln() * 0.25
}

/// Split markdown into sections at headings, then pack paragraphs of
/// oversized sections into pieces of at most `chunk_size` characters.
fn chunk_markdown(text: &str, chunk_size: usize) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    let mut chunks = Vec::new();
    for section in sections {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        if section.chars().count() <= chunk_size {
            chunks.push(section.to_string());
            continue;
        }

        let mut packed = String::new();
        for para in section.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let para_len = para.chars().count();
            if !packed.is_empty() && packed.chars().count() + 2 + para_len > chunk_size {
                chunks.push(std::mem::take(&mut packed));
            }
            if para_len > chunk_size {
                chunks.extend(split_chars(para, chunk_size));
                continue;
            }
            if !packed.is_empty() {
                packed.push_str("\n\n");
            }
            packed.push_str(para);
        }
        if !packed.is_empty() {
            chunks.push(packed);
        }
    }
    chunks
}

fn split_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// One of the three document search tools, distinguished by scope.
pub struct SearchDocumentsTool {
    index: Arc<DocumentIndex>,
    scope: SearchScope,
}

impl SearchDocumentsTool {
    pub fn new(index: Arc<DocumentIndex>, scope: SearchScope) -> Self {
        Self { index, scope }
    }

    fn format_hit(&self, i: usize, hit: &SearchHit) -> String {
        match self.scope {
            SearchScope::Policy => format!("**Source {i}: {}**\n{}\n", hit.source, hit.content),
            SearchScope::Troubleshooting => format!(
                "**Troubleshooting Step {i}** (from {}):\n{}\n",
                hit.source, hit.content
            ),
            SearchScope::All => format!("**Result {i}** (from {}):\n{}\n", hit.source, hit.content),
        }
    }

    fn no_results(&self) -> &'static str {
        match self.scope {
            SearchScope::Policy => {
                "No relevant policy information found. Please rephrase your query or contact IT helpdesk for specific policy questions."
            }
            SearchScope::Troubleshooting => {
                "No relevant troubleshooting information found. Please provide more details about the issue or contact IT helpdesk for assistance."
            }
            SearchScope::All => {
                "No relevant information found in IT documentation. Please contact IT helpdesk for assistance."
            }
        }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        match self.scope {
            SearchScope::Policy => "search_it_policy",
            SearchScope::Troubleshooting => "search_troubleshooting_guide",
            SearchScope::All => "search_all_documents",
        }
    }

    fn description(&self) -> &str {
        match self.scope {
            SearchScope::Policy => {
                "Search IT policy documents: passwords, VPN access, email quotas, software installation, device management, data security and incident reporting."
            }
            SearchScope::Troubleshooting => {
                "Search troubleshooting guides for step-by-step fixes: login issues, slow computers, network problems, shared drives, email, printers, crashing software, video calls."
            }
            SearchScope::All => {
                "Search across all IT documentation when unsure whether the answer is in a policy or a troubleshooting guide."
            }
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let hits = self.index.search(query, self.scope);
        tracing::debug!(tool = self.name(), query, hits = hits.len(), "Document search");

        if hits.is_empty() {
            return Ok(ToolResult::ok(self.no_results()));
        }

        let output = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| self.format_hit(i + 1, hit))
            .collect::<Vec<_>>()
            .join("\n---\n");

        Ok(ToolResult::ok(output).with_data(serde_json::to_value(&hits).unwrap_or_default()))
    }
}
