//! Text segmentation for embedding and synthesis.
//!
//! Converts a document of any length into ordered, bounded chunks. The
//! strategy is picked from the shape of the input, first match wins:
//!
//! 1. **Headings**: split at Markdown heading lines (levels 1-5). Text before
//!    the first heading becomes an `## Introduction` chunk. A section still
//!    over budget is re-split by paragraphs, and a paragraph that alone is
//!    too large is cut into linear windows.
//! 2. **Paragraphs**: greedily pack blank-line separated paragraphs. A single
//!    paragraph over budget is emitted as one oversize chunk.
//! 3. **Linear**: fixed windows of `budget` units, each overlapping the
//!    previous one by `overlap` units.
//!
//! A call measures everything in one unit: tokens when a token limit is
//! configured, characters otherwise. The segmenter holds no mutable state
//! and can be shared across tasks.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brainops_core::chunking::{Segmenter, SplitConfig};
//! use brainops_core::TiktokenTokenizer;
//!
//! let tokenizer = Arc::new(TiktokenTokenizer::for_embeddings()?);
//! let segmenter = Segmenter::new(tokenizer, SplitConfig::default());
//! for chunk in segmenter.segment("# Title\nBody") {
//!     println!("{} ({} {})", chunk.text, chunk.size, segmenter.config().budget().unit());
//! }
//! ```

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::{env_opt, env_or};
use crate::defaults;
use crate::tokenizer::Tokenizer;

/// Markdown heading line, levels 1 to 5.
static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,5}[ \t]+\S.*$").expect("valid heading regex"));

/// Paragraph boundary: a line break, optional blank space, another line break.
static PARAGRAPH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"));

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Size limit of one chunk, in exactly one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "limit", rename_all = "lowercase")]
pub enum SplitBudget {
    Tokens(usize),
    Chars(usize),
}

impl SplitBudget {
    /// Token limit wins when both are supplied.
    pub fn resolve(max_tokens: Option<usize>, max_chars: usize) -> Self {
        match max_tokens {
            Some(tokens) => SplitBudget::Tokens(tokens),
            None => SplitBudget::Chars(max_chars),
        }
    }

    pub fn limit(&self) -> usize {
        match self {
            SplitBudget::Tokens(n) | SplitBudget::Chars(n) => *n,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SplitBudget::Tokens(_) => "tokens",
            SplitBudget::Chars(_) => "chars",
        }
    }

    fn with_limit(&self, limit: usize) -> Self {
        match self {
            SplitBudget::Tokens(_) => SplitBudget::Tokens(limit),
            SplitBudget::Chars(_) => SplitBudget::Chars(limit),
        }
    }
}

/// Segmentation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitConfig {
    /// Token limit; takes precedence over `max_chars` when set.
    pub max_tokens: Option<usize>,
    /// Character limit used when no token limit is set.
    pub max_chars: usize,
    /// Overlap between consecutive linear windows, in the active unit.
    pub overlap: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_chars: defaults::SPLIT_MAX_CHARS,
            overlap: defaults::SPLIT_OVERLAP,
        }
    }
}

impl SplitConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SPLIT_MAX_TOKENS` | unset | Token budget per chunk (wins over chars) |
    /// | `SPLIT_MAX_CHARS` | `3800` | Character budget per chunk |
    /// | `SPLIT_OVERLAP` | `350` | Linear window overlap |
    pub fn from_env() -> Self {
        Self {
            max_tokens: env_opt::<usize>("SPLIT_MAX_TOKENS").filter(|n| *n > 0),
            max_chars: env_or("SPLIT_MAX_CHARS", defaults::SPLIT_MAX_CHARS).max(1),
            overlap: env_or("SPLIT_OVERLAP", defaults::SPLIT_OVERLAP),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn budget(&self) -> SplitBudget {
        SplitBudget::resolve(self.max_tokens, self.max_chars)
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

/// How a chunk was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Text preceding the first heading, under an injected heading.
    Introduction,
    /// A heading section (or a piece of one).
    Section,
    /// One or more packed paragraphs.
    Paragraphs,
    /// A linear window.
    Window,
}

/// Strategy selected for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    Headings,
    Paragraphs,
    Linear,
}

/// One bounded unit of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the output sequence.
    pub index: usize,
    /// Trimmed text; heading chunks start with their heading line.
    pub text: String,
    /// Heading line carried as prefix, if any.
    pub heading: Option<String>,
    /// Size of `text` in the active unit.
    pub size: usize,
    /// Set when `size` exceeds the budget (unsplittable unit).
    pub oversize: bool,
    pub kind: ChunkKind,
}

// =============================================================================
// SEGMENTER
// =============================================================================

/// Text segmenter.
#[derive(Clone)]
pub struct Segmenter {
    tokenizer: Arc<dyn Tokenizer>,
    config: SplitConfig,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("tokenizer", &self.tokenizer.name())
            .field("config", &self.config)
            .finish()
    }
}

/// What to do with a paragraph that alone exceeds the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OversizeParagraph {
    Atomic,
    Windows,
}

/// Intermediate piece before sizing and indexing.
struct Piece {
    text: String,
    heading: Option<String>,
    kind: ChunkKind,
}

impl Segmenter {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: SplitConfig) -> Self {
        Self { tokenizer, config }
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Strategy that [`Segmenter::segment`] would use; `None` for blank input.
    pub fn strategy(text: &str) -> Option<SplitStrategy> {
        let text = text.trim();
        if text.is_empty() {
            None
        } else if HEADING_RE.is_match(text) {
            Some(SplitStrategy::Headings)
        } else if PARAGRAPH_RE.is_match(text) {
            Some(SplitStrategy::Paragraphs)
        } else {
            Some(SplitStrategy::Linear)
        }
    }

    /// Segment with the configured budget.
    pub fn segment(&self, text: &str) -> Vec<Chunk> {
        self.segment_with_budget(text, self.config.budget())
    }

    /// Segment and return only chunk texts.
    pub fn segment_texts(&self, text: &str) -> Vec<String> {
        self.segment(text).into_iter().map(|c| c.text).collect()
    }

    /// Segment with an explicit budget.
    ///
    /// Output is empty iff the trimmed input is empty.
    pub fn segment_with_budget(&self, text: &str, budget: SplitBudget) -> Vec<Chunk> {
        let budget = budget.with_limit(budget.limit().max(1));
        let text = text.trim();
        let Some(strategy) = Self::strategy(text) else {
            return Vec::new();
        };

        debug!(
            subsystem = "split",
            component = "segmenter",
            op = "segment",
            ?strategy,
            size = text.len(),
            limit = budget.limit(),
            unit = budget.unit(),
            "Segmenting text"
        );

        let pieces = match strategy {
            SplitStrategy::Headings => self.split_headings(text, budget),
            SplitStrategy::Paragraphs => self
                .pack_paragraphs(text, budget, OversizeParagraph::Atomic)
                .into_iter()
                .map(|text| Piece {
                    text,
                    heading: None,
                    kind: ChunkKind::Paragraphs,
                })
                .collect(),
            SplitStrategy::Linear => self
                .linear_windows(text, budget)
                .into_iter()
                .map(|text| Piece {
                    text,
                    heading: None,
                    kind: ChunkKind::Window,
                })
                .collect(),
        };

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .filter(|p| !p.text.trim().is_empty())
            .enumerate()
            .map(|(index, piece)| {
                let text = piece.text.trim().to_string();
                let size = self.measure(&text, budget);
                let oversize = size > budget.limit();
                trace!(
                    subsystem = "split",
                    index,
                    size,
                    oversize,
                    kind = ?piece.kind,
                    "Chunk emitted"
                );
                Chunk {
                    index,
                    text,
                    heading: piece.heading,
                    size,
                    oversize,
                    kind: piece.kind,
                }
            })
            .collect();

        debug!(
            subsystem = "split",
            component = "segmenter",
            op = "segment",
            chunk_count = chunks.len(),
            "Segmentation complete"
        );
        chunks
    }

    fn measure(&self, text: &str, budget: SplitBudget) -> usize {
        match budget {
            SplitBudget::Tokens(_) => self.tokenizer.count_tokens(text),
            SplitBudget::Chars(_) => text.chars().count(),
        }
    }

    // -------------------------------------------------------------------------
    // Strategy 1: headings
    // -------------------------------------------------------------------------

    fn split_headings(&self, text: &str, budget: SplitBudget) -> Vec<Piece> {
        let matches: Vec<_> = HEADING_RE.find_iter(text).collect();
        let mut pieces = Vec::new();

        if let Some(first) = matches.first() {
            let intro = text[..first.start()].trim();
            if !intro.is_empty() {
                pieces.extend(self.split_section(
                    defaults::SPLIT_INTRO_HEADING,
                    intro,
                    budget,
                    ChunkKind::Introduction,
                ));
            }
        }

        for (i, m) in matches.iter().enumerate() {
            let end = matches.get(i + 1).map_or(text.len(), |next| next.start());
            let heading = m.as_str().trim();
            let body = text[m.end()..end].trim();
            pieces.extend(self.split_section(heading, body, budget, ChunkKind::Section));
        }

        pieces
    }

    fn split_section(
        &self,
        heading: &str,
        body: &str,
        budget: SplitBudget,
        kind: ChunkKind,
    ) -> Vec<Piece> {
        let piece = |text: String| Piece {
            text,
            heading: Some(heading.to_string()),
            kind,
        };

        let full = if body.is_empty() {
            heading.to_string()
        } else {
            format!("{}\n{}", heading, body)
        };
        if body.is_empty() || self.measure(&full, budget) <= budget.limit() {
            return vec![piece(full)];
        }

        let header_cost = self.measure(&format!("{}\n", heading), budget);
        if header_cost >= budget.limit() {
            warn!(
                subsystem = "split",
                component = "segmenter",
                heading,
                size = header_cost,
                limit = budget.limit(),
                unit = budget.unit(),
                "Heading alone exceeds budget, emitting section as oversize chunk"
            );
            return vec![piece(full)];
        }

        debug!(
            subsystem = "split",
            heading,
            "Section over budget, re-splitting by paragraphs"
        );
        let sub_budget = budget.with_limit(budget.limit() - header_cost);
        self.pack_paragraphs(body, sub_budget, OversizeParagraph::Windows)
            .into_iter()
            .map(|part| piece(format!("{}\n{}", heading, part)))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Strategy 2: paragraphs
    // -------------------------------------------------------------------------

    fn pack_paragraphs(
        &self,
        text: &str,
        budget: SplitBudget,
        oversize: OversizeParagraph,
    ) -> Vec<String> {
        let limit = budget.limit();
        let mut out = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();

        let paragraphs = PARAGRAPH_RE
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty());

        for paragraph in paragraphs {
            let size = self.measure(paragraph, budget);
            if size > limit {
                if !buffer.is_empty() {
                    out.push(buffer.join("\n\n"));
                    buffer.clear();
                }
                match oversize {
                    OversizeParagraph::Atomic => {
                        warn!(
                            subsystem = "split",
                            component = "segmenter",
                            size,
                            limit,
                            unit = budget.unit(),
                            "Single paragraph exceeds budget, emitting as oversize chunk"
                        );
                        out.push(paragraph.to_string());
                    }
                    OversizeParagraph::Windows => {
                        out.extend(self.linear_windows(paragraph, budget));
                    }
                }
                continue;
            }

            buffer.push(paragraph);
            if buffer.len() > 1 && self.measure(&buffer.join("\n\n"), budget) > limit {
                buffer.pop();
                out.push(buffer.join("\n\n"));
                buffer.clear();
                buffer.push(paragraph);
            }
        }

        if !buffer.is_empty() {
            out.push(buffer.join("\n\n"));
        }
        out
    }

    // -------------------------------------------------------------------------
    // Strategy 3: linear windows
    // -------------------------------------------------------------------------

    fn linear_windows(&self, text: &str, budget: SplitBudget) -> Vec<String> {
        let limit = budget.limit();
        let overlap = if self.config.overlap >= limit {
            limit / 2
        } else {
            self.config.overlap
        };
        let step = (limit - overlap).max(1);

        match budget {
            SplitBudget::Chars(_) => {
                let bounds: Vec<usize> = text
                    .char_indices()
                    .map(|(i, _)| i)
                    .chain(std::iter::once(text.len()))
                    .collect();
                let total = bounds.len() - 1;
                windows(total, limit, step)
                    .map(|(start, end)| text[bounds[start]..bounds[end]].trim().to_string())
                    .filter(|w| !w.is_empty())
                    .collect()
            }
            SplitBudget::Tokens(_) => {
                let tokens = self.tokenizer.encode(text);
                let mut bytes = Vec::with_capacity(text.len());
                let mut offsets = Vec::with_capacity(tokens.len() + 1);
                for token in &tokens {
                    offsets.push(bytes.len());
                    bytes.extend(self.tokenizer.decode_bytes(std::slice::from_ref(token)));
                }
                offsets.push(bytes.len());

                // Token indices where a cut does not split a character.
                let cuts: Vec<usize> = offsets
                    .iter()
                    .enumerate()
                    .filter(|&(_, &off)| off == bytes.len() || !is_utf8_continuation(bytes[off]))
                    .map(|(i, _)| i)
                    .collect();

                snapped_windows(&cuts, limit, step)
                    .into_iter()
                    .map(|(start, end)| {
                        String::from_utf8_lossy(&bytes[offsets[start]..offsets[end]])
                            .trim()
                            .to_string()
                    })
                    .filter(|w| !w.is_empty())
                    .collect()
            }
        }
    }
}

fn is_utf8_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Like [`windows`], but every `start` and `end` is taken from `cuts`
/// (sorted, starting at 0 and ending at the total).
///
/// An end is moved back to the nearest cut, or forward when no cut fits
/// after `start`. The next start never passes the previous end, so every
/// unit lands in at least one window.
fn snapped_windows(cuts: &[usize], size: usize, step: usize) -> Vec<(usize, usize)> {
    let total = cuts.last().copied().unwrap_or(0);
    let floor = |target: usize| cuts[cuts.partition_point(|&c| c <= target) - 1];
    let after = |index: usize| cuts[cuts.partition_point(|&c| c <= index)];

    let mut out = Vec::new();
    let mut start = 0;
    while start < total {
        let end = if start + size >= total {
            total
        } else {
            let end = floor(start + size);
            if end > start {
                end
            } else {
                after(start)
            }
        };
        out.push((start, end));
        if end >= total {
            break;
        }
        let next = floor(start + step).min(end);
        start = if next > start { next } else { after(start) };
    }
    out
}

/// `[start, end)` windows of `size` over `total` units advancing by `step`.
fn windows(total: usize, size: usize, step: usize) -> impl Iterator<Item = (usize, usize)> {
    let mut start = 0;
    let mut done = total == 0;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let end = (start + size).min(total);
        let window = (start, end);
        if end >= total {
            done = true;
        } else {
            start += step;
        }
        Some(window)
    })
}
