//! The two-level document model.
//!
//! A [`HierarchicalDocument`] owns its [`Block`]s, and each block owns its
//! [`Chunk`]s. Parent and neighbour relations are ids resolved through the
//! document's lookup tables, so the structure is a plain tree of values with
//! no back-pointers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identifier of a [`Block`].
    BlockId
);

string_id!(
    /// Stable identifier of a [`Chunk`].
    ChunkId
);

/// Structural kind of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Body of a heading section.
    Section,
    /// One or more prose paragraphs.
    Paragraph,
    /// A bullet or numbered list.
    List,
    /// A fenced or indented code block.
    Code,
}

impl BlockType {
    /// Lowercase name, as stored in index metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Paragraph => "paragraph",
            Self::List => "list",
            Self::Code => "code",
        }
    }
}

/// A retrieval-sized fragment of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk.
    pub id: ChunkId,

    /// Block that owns this chunk.
    pub block_id: BlockId,

    /// Position within the block, starting at 0.
    pub position: usize,

    /// Exact slice of the block text.
    pub text: String,

    /// Byte offset of the first character within the block text.
    pub start: usize,

    /// Byte offset one past the last character within the block text.
    pub end: usize,

    /// Previous chunk in the same block.
    pub prev: Option<ChunkId>,

    /// Next chunk in the same block.
    pub next: Option<ChunkId>,
}

impl Chunk {
    /// Character count of the chunk text.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A structurally coherent unit of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Unique identifier for this block.
    pub id: BlockId,

    /// Position in the document, starting at 0.
    pub position: usize,

    /// Heading of the enclosing section, if any.
    pub heading: Option<String>,

    /// Markdown heading level (1-6) when `heading` is set.
    pub heading_level: Option<u8>,

    /// Structural kind.
    pub block_type: BlockType,

    /// Exact slice of the normalized document.
    pub text: String,

    /// Byte offset of the block within the normalized document.
    pub start: usize,

    /// Byte offset one past the end of the block.
    pub end: usize,

    /// Heading plus leading text, used for block-level embeddings.
    pub summary: String,

    /// Chunks in order. Their texts concatenate to `text`.
    pub chunks: Vec<Chunk>,

    /// Previous block in the document.
    pub prev: Option<BlockId>,

    /// Next block in the document.
    pub next: Option<BlockId>,
}

impl Block {
    /// Ids of the owned chunks, in order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.chunks.iter().map(|c| &c.id)
    }

    /// Short human-readable label used in logs and transitions.
    pub fn label(&self) -> String {
        match &self.heading {
            Some(heading) => format!("{heading} (block {})", self.position),
            None => format!("block {}", self.position),
        }
    }
}

/// A document split into blocks and chunks.
///
/// Immutable once built. Re-ingesting the same source produces a new
/// document rather than mutating this one.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchicalDocument {
    /// Caller-supplied source identifier.
    pub source_id: String,

    /// SHA-256 of the normalized text, hex encoded.
    pub content_hash: String,

    blocks: Vec<Block>,

    #[serde(skip)]
    block_lookup: HashMap<BlockId, usize>,

    #[serde(skip)]
    chunk_lookup: HashMap<ChunkId, (usize, usize)>,
}

impl HierarchicalDocument {
    /// Assemble a document and build its id lookups.
    pub fn new(
        source_id: impl Into<String>,
        content_hash: impl Into<String>,
        blocks: Vec<Block>,
    ) -> Self {
        let mut block_lookup = HashMap::with_capacity(blocks.len());
        let mut chunk_lookup = HashMap::new();
        for (b, block) in blocks.iter().enumerate() {
            block_lookup.insert(block.id.clone(), b);
            for (c, chunk) in block.chunks.iter().enumerate() {
                chunk_lookup.insert(chunk.id.clone(), (b, c));
            }
        }

        Self {
            source_id: source_id.into(),
            content_hash: content_hash.into(),
            blocks,
            block_lookup,
            chunk_lookup,
        }
    }

    /// Blocks in document order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// All chunks in document order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.blocks.iter().flat_map(|b| b.chunks.iter())
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of chunks across all blocks.
    pub fn chunk_count(&self) -> usize {
        self.chunk_lookup.len()
    }

    /// Look up a block by id.
    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.block_lookup.get(id).map(|&b| &self.blocks[b])
    }

    /// Look up a chunk by id.
    pub fn chunk(&self, id: &ChunkId) -> Option<&Chunk> {
        self.chunk_lookup
            .get(id)
            .map(|&(b, c)| &self.blocks[b].chunks[c])
    }

    /// The block that owns `chunk`.
    pub fn parent_of(&self, chunk: &ChunkId) -> Option<&Block> {
        self.chunk_lookup.get(chunk).map(|&(b, _)| &self.blocks[b])
    }

    /// Document position of a chunk as (block position, chunk position).
    pub fn position_of(&self, chunk: &ChunkId) -> Option<(usize, usize)> {
        self.chunk_lookup.get(chunk).copied()
    }
}
