//! Structural two-level chunking.
//!
//! Documents are split on structural boundaries (markdown headings and
//! blank-line paragraph breaks) into [`Block`]s, and each block is split into
//! retrieval-sized [`Chunk`]s on sentence boundaries. Chunk spans are
//! contiguous, so a block's chunk texts concatenate back to the block text.
//!
//! Chunking never fails: input with no usable structure becomes a single
//! block holding a single chunk.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::document::{Block, BlockId, BlockType, Chunk, ChunkId, HierarchicalDocument};
use crate::text::prefix_chars;

/// Configuration for the chunker. Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Smallest chunk a cut may produce (except a block's last chunk).
    pub min_chunk_chars: usize,

    /// Preferred chunk size.
    pub target_chunk_chars: usize,

    /// Largest chunk a cut may produce when a boundary exists.
    pub max_chunk_chars: usize,

    /// Headingless paragraphs are grouped until a block reaches this size.
    pub min_block_chars: usize,

    /// Blocks are split at paragraph breaks beyond this size.
    pub max_block_chars: usize,

    /// Length of the text excerpt in block summaries.
    pub summary_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 500,
            target_chunk_chars: 800,
            max_chunk_chars: 1000,
            min_block_chars: 400,
            max_block_chars: 4000,
            summary_chars: 200,
        }
    }
}

impl ChunkerConfig {
    /// Set the chunk size band.
    pub fn with_chunk_band(mut self, min: usize, target: usize, max: usize) -> Self {
        self.min_chunk_chars = min;
        self.target_chunk_chars = target;
        self.max_chunk_chars = max;
        self
    }

    /// Set the block size limits.
    pub fn with_block_limits(mut self, min: usize, max: usize) -> Self {
        self.min_block_chars = min;
        self.max_block_chars = max;
        self
    }
}

/// Line-level structure found while scanning a document.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Heading { level: u8, title: String },
    /// Byte span of a paragraph (or fenced block) in the normalized text.
    Paragraph { start: usize, end: usize },
}

/// A block before ids and chunks are assigned.
struct BlockDraft {
    heading: Option<(u8, String)>,
    block_type: BlockType,
    start: usize,
    end: usize,
}

/// Strength of a candidate chunk cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CutKind {
    Sentence,
    Word,
}

/// A position where a chunk may end: just after a whitespace run.
#[derive(Debug, Clone, Copy)]
struct Cut {
    byte: usize,
    char: usize,
    kind: CutKind,
}

/// Splits documents into a [`HierarchicalDocument`].
pub struct HierarchicalChunker {
    config: ChunkerConfig,
    heading: Option<Regex>,
    list_item: Option<Regex>,
}

impl HierarchicalChunker {
    /// Create a chunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            heading: Regex::new(r"^(#{1,6})[ \t]+(.+?)[ \t#]*$").ok(),
            list_item: Regex::new(r"^\s*([-*+]|\d+[.)])\s+\S").ok(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk `text` into a document identified by `source_id`.
    pub fn chunk(&self, source_id: &str, text: &str) -> HierarchicalDocument {
        let normalized = normalize_newlines(text);
        let content_hash = hex_digest(normalized.as_bytes());
        let id_prefix = hex_digest(source_id.as_bytes())[..8].to_string();

        let segments = self.scan(&normalized);
        let mut drafts = self.group_blocks(&normalized, &segments);
        if drafts.is_empty() {
            drafts.push(BlockDraft {
                heading: None,
                block_type: BlockType::Paragraph,
                start: 0,
                end: normalized.len(),
            });
        }

        let block_ids: Vec<BlockId> = (0..drafts.len())
            .map(|position| BlockId::new(format!("{id_prefix}-b{position:04}")))
            .collect();

        let blocks: Vec<Block> = drafts
            .into_iter()
            .enumerate()
            .map(|(position, draft)| {
                let text = &normalized[draft.start..draft.end];
                let (heading_level, heading) = match draft.heading {
                    Some((level, title)) => (Some(level), Some(title)),
                    None => (None, None),
                };
                let summary = match &heading {
                    Some(h) => format!("{h}: {}", prefix_chars(text.trim(), self.config.summary_chars)),
                    None => prefix_chars(text.trim(), self.config.summary_chars).to_string(),
                };

                Block {
                    id: block_ids[position].clone(),
                    position,
                    heading,
                    heading_level,
                    block_type: draft.block_type,
                    text: text.to_string(),
                    start: draft.start,
                    end: draft.end,
                    summary,
                    chunks: self.build_chunks(&block_ids[position], text),
                    prev: position.checked_sub(1).map(|p| block_ids[p].clone()),
                    next: block_ids.get(position + 1).cloned(),
                }
            })
            .collect();

        debug!(
            "Chunked {source_id}: {} blocks, {} chunks",
            blocks.len(),
            blocks.iter().map(|b| b.chunks.len()).sum::<usize>()
        );

        HierarchicalDocument::new(source_id, content_hash, blocks)
    }

    /// Scan lines into headings and paragraphs. Fenced code is one
    /// paragraph regardless of inner blank lines.
    fn scan(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut open: Option<(usize, usize)> = None;
        let mut in_fence = false;
        let mut offset = 0;

        let close = |open: &mut Option<(usize, usize)>, segments: &mut Vec<Segment>| {
            if let Some((start, end)) = open.take() {
                segments.push(Segment::Paragraph { start, end });
            }
        };

        for raw in text.split_inclusive('\n') {
            let start = offset;
            offset += raw.len();
            let line = raw.strip_suffix('\n').unwrap_or(raw);
            let line_end = start + line.len();
            let is_fence = line.trim_start().starts_with("```");

            if in_fence {
                if let Some(span) = open.as_mut() {
                    span.1 = line_end;
                }
                if is_fence {
                    in_fence = false;
                    close(&mut open, &mut segments);
                }
                continue;
            }

            if line.trim().is_empty() {
                close(&mut open, &mut segments);
                continue;
            }

            if let Some((level, title)) = self.detect_heading(line) {
                close(&mut open, &mut segments);
                segments.push(Segment::Heading { level, title });
                continue;
            }

            if is_fence {
                close(&mut open, &mut segments);
                open = Some((start, line_end));
                in_fence = true;
                continue;
            }

            match open.as_mut() {
                Some(span) => span.1 = line_end,
                None => open = Some((start, line_end)),
            }
        }
        close(&mut open, &mut segments);

        segments
    }

    fn detect_heading(&self, line: &str) -> Option<(u8, String)> {
        let captures = self.heading.as_ref()?.captures(line)?;
        let level = captures.get(1)?.as_str().len() as u8;
        let title = captures.get(2)?.as_str().trim().to_string();
        Some((level, title))
    }

    fn is_list_item(&self, line: &str) -> bool {
        self.list_item.as_ref().is_some_and(|re| re.is_match(line))
    }

    /// Group paragraphs into blocks: one or more per heading section, and
    /// size-bounded groups for headingless content.
    fn group_blocks(&self, text: &str, segments: &[Segment]) -> Vec<BlockDraft> {
        let mut drafts = Vec::new();
        let mut heading: Option<(u8, String)> = None;
        let mut pending: Vec<(usize, usize)> = Vec::new();

        for segment in segments {
            match segment {
                Segment::Heading { level, title } => {
                    self.flush(text, heading.take(), &mut pending, &mut drafts);
                    heading = Some((*level, title.clone()));
                }
                Segment::Paragraph { start, end } => pending.push((*start, *end)),
            }
        }
        self.flush(text, heading, &mut pending, &mut drafts);

        drafts
    }

    fn flush(
        &self,
        text: &str,
        heading: Option<(u8, String)>,
        pending: &mut Vec<(usize, usize)>,
        drafts: &mut Vec<BlockDraft>,
    ) {
        let paragraphs = std::mem::take(pending);
        if paragraphs.is_empty() {
            return;
        }

        let span_chars = |start: usize, end: usize| text[start..end].chars().count();
        let mut group: Vec<(usize, usize)> = Vec::new();

        for (start, end) in paragraphs {
            if let Some(&(first, _)) = group.first() {
                let would_exceed = span_chars(first, end) > self.config.max_block_chars;
                let headingless_full = heading.is_none()
                    && group
                        .last()
                        .is_some_and(|&(_, last)| span_chars(first, last) >= self.config.min_block_chars);
                if would_exceed || headingless_full {
                    drafts.push(self.draft(text, heading.clone(), &group));
                    group.clear();
                }
            }
            group.push((start, end));
        }
        if !group.is_empty() {
            drafts.push(self.draft(text, heading, &group));
        }
    }

    fn draft(&self, text: &str, heading: Option<(u8, String)>, group: &[(usize, usize)]) -> BlockDraft {
        let start = group.first().map_or(0, |g| g.0);
        let end = group.last().map_or(0, |g| g.1);
        let block_type = match heading {
            Some(_) => BlockType::Section,
            None => self.detect_block_type(text, group),
        };
        BlockDraft {
            heading,
            block_type,
            start,
            end,
        }
    }

    fn detect_block_type(&self, text: &str, group: &[(usize, usize)]) -> BlockType {
        let paragraphs: Vec<&str> = group.iter().map(|&(s, e)| &text[s..e]).collect();

        let is_code = |p: &&str| {
            p.trim_start().starts_with("```")
                || p.lines().all(|l| l.starts_with("    ") || l.starts_with('\t'))
        };
        if paragraphs.iter().all(is_code) {
            return BlockType::Code;
        }

        let is_list = |p: &&str| {
            p.lines()
                .filter(|l| !l.trim().is_empty())
                .all(|l| self.is_list_item(l) || l.starts_with("  "))
        };
        if paragraphs.iter().all(is_list) {
            return BlockType::List;
        }

        BlockType::Paragraph
    }

    fn build_chunks(&self, block_id: &BlockId, text: &str) -> Vec<Chunk> {
        let spans = self.chunk_spans(text);
        let ids: Vec<ChunkId> = (0..spans.len())
            .map(|position| ChunkId::new(format!("{block_id}-c{position:03}")))
            .collect();

        spans
            .into_iter()
            .enumerate()
            .map(|(position, (start, end))| Chunk {
                id: ids[position].clone(),
                block_id: block_id.clone(),
                position,
                text: text[start..end].to_string(),
                start,
                end,
                prev: position.checked_sub(1).map(|p| ids[p].clone()),
                next: ids.get(position + 1).cloned(),
            })
            .collect()
    }

    /// Contiguous byte spans covering `text` exactly.
    ///
    /// Each cut prefers a sentence boundary closest to the target size inside
    /// the size band, then a word boundary inside the band, then the first
    /// boundary past the band. Text with no boundary stays whole.
    fn chunk_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let total = text.chars().count();
        if total <= self.config.max_chunk_chars {
            return vec![(0, text.len())];
        }

        let cuts = cut_points(text);
        let mut spans = Vec::new();
        let (mut start_byte, mut start_char) = (0, 0);

        while total - start_char > self.config.max_chunk_chars {
            let lo = start_char + self.config.min_chunk_chars;
            let hi = start_char + self.config.max_chunk_chars;
            let target = start_char + self.config.target_chunk_chars;

            let closest = |kind: CutKind| {
                cuts.iter()
                    .filter(|c| c.kind == kind && c.char > start_char && (lo..=hi).contains(&c.char))
                    .min_by_key(|c| c.char.abs_diff(target))
            };
            let Some(cut) = closest(CutKind::Sentence)
                .or_else(|| closest(CutKind::Word))
                .or_else(|| cuts.iter().find(|c| c.char > hi))
            else {
                break;
            };

            spans.push((start_byte, cut.byte));
            start_byte = cut.byte;
            start_char = cut.char;
        }

        spans.push((start_byte, text.len()));
        spans
    }
}

impl Default for HierarchicalChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Every position just after a whitespace run, excluding the end of text.
/// A run following `.`, `!` or `?`, or containing a newline, is a sentence
/// boundary.
fn cut_points(text: &str) -> Vec<Cut> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut cuts = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].1.is_whitespace() {
            i += 1;
            continue;
        }
        let run_start = i;
        let mut has_newline = false;
        while i < chars.len() && chars[i].1.is_whitespace() {
            has_newline |= chars[i].1 == '\n';
            i += 1;
        }
        if run_start == 0 || i == chars.len() {
            continue;
        }
        let after_terminal = matches!(chars[run_start - 1].1, '.' | '!' | '?');
        cuts.push(Cut {
            byte: chars[i].0,
            char: i,
            kind: if after_terminal || has_newline {
                CutKind::Sentence
            } else {
                CutKind::Word
            },
        });
    }

    cuts
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
