//! Reader Documents
//!
//! A loaded text file plus the generated blocks the reader has accepted
//! into it. Positions are character indexes into the decoded text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Extensions accepted by [`Document::load`]
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "md", "text"];

/// Largest file accepted by default (50 MiB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Errors raised while loading a document
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Extension is not one of [`SUPPORTED_EXTENSIONS`]
    #[error("File type not supported: {0}. Accepted types: .txt, .md, .text")]
    UnsupportedExtension(String),

    /// File exceeds the size limit
    #[error("File too large ({}). Maximum size: {}", size_label(.size), size_label(.max))]
    TooLarge {
        /// Actual size in bytes
        size: u64,
        /// Limit in bytes
        max: u64,
    },

    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },
}

/// Human-readable byte count (`1.5 KB`, `50 MB`)
#[must_use]
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}

fn size_label(bytes: &u64) -> String {
    format_file_size(*bytes)
}

/// How the raw bytes were decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// Valid UTF-8
    Utf8,
    /// UTF-8 with a byte order mark (stripped)
    Utf8Bom,
    /// UTF-16 little endian, detected by BOM
    Utf16Le,
    /// UTF-16 big endian, detected by BOM
    Utf16Be,
    /// Invalid UTF-8; undecodable bytes replaced with U+FFFD
    Utf8Lossy,
}

impl TextEncoding {
    /// Sniff the encoding of `bytes` and decode them
    #[must_use]
    pub fn decode(bytes: &[u8]) -> (String, Self) {
        if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
            return (String::from_utf8_lossy(rest).into_owned(), Self::Utf8Bom);
        }
        if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
            return (decode_utf16(rest, u16::from_le_bytes), Self::Utf16Le);
        }
        if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
            return (decode_utf16(rest, u16::from_be_bytes), Self::Utf16Be);
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_string(), Self::Utf8),
            Err(_) => (String::from_utf8_lossy(bytes).into_owned(), Self::Utf8Lossy),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// A character position in the text
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPosition {
    /// Character index from the start of the text
    pub index: usize,
    /// Zero-based line number
    pub line: usize,
    /// Zero-based column within the line, in characters
    pub column: usize,
}

/// Context extracted around a click
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickContext {
    /// Clicked character index
    pub text_index: usize,
    /// First character of the context window
    pub context_start: usize,
    /// One past the last character of the context window
    pub context_end: usize,
    /// Context text, whitespace-trimmed
    pub context_text: String,
}

/// Generated text accepted into the document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedBlock {
    /// Block identifier
    pub id: Uuid,
    /// Insert position (character index in the loaded text)
    pub position: usize,
    /// Generated text
    pub content: String,
    /// When the block was accepted
    pub timestamp: DateTime<Utc>,
    /// Tags used for the generation
    pub tags: Vec<String>,
}

/// A loaded text document
#[derive(Clone, Debug)]
pub struct Document {
    name: String,
    text: String,
    encoding: TextEncoding,
    size: u64,
    /// Keyed by insert position; one block per position
    blocks: BTreeMap<usize, GeneratedBlock>,
}

impl Document {
    /// Decode a document from raw bytes
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let (text, encoding) = TextEncoding::decode(bytes);
        Self {
            name: name.into(),
            text,
            encoding,
            size: bytes.len() as u64,
            blocks: BTreeMap::new(),
        }
    }

    /// Create a document from text already in memory
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            name: name.into(),
            size: text.len() as u64,
            text,
            encoding: TextEncoding::Utf8,
            blocks: BTreeMap::new(),
        }
    }

    /// Load a file, checking its extension and size first
    ///
    /// # Errors
    ///
    /// Returns `DocumentError` for an unsupported extension, a file larger
    /// than `max_size`, or an I/O failure.
    pub async fn load(path: impl AsRef<Path>, max_size: u64) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        check_extension(path)?;

        let io_err = |source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        };

        let size = tokio::fs::metadata(path).await.map_err(io_err)?.len();
        if size > max_size {
            return Err(DocumentError::TooLarge {
                size,
                max: max_size,
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let document = Self::from_bytes(name, &bytes);

        tracing::info!(
            path = %path.display(),
            size = %format_file_size(size),
            encoding = ?document.encoding,
            "Loaded document"
        );
        if document.encoding == TextEncoding::Utf8Lossy {
            tracing::warn!(path = %path.display(), "Document is not valid UTF-8; some characters were replaced");
        }

        Ok(document)
    }

    /// File name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Detected encoding
    #[must_use]
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Size of the raw file in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of characters in the text
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Locate a character index, or `None` if it is past the end
    #[must_use]
    pub fn position(&self, index: usize) -> Option<TextPosition> {
        let mut line = 0;
        let mut column = 0;
        let mut chars = self.text.chars();
        for _ in 0..index {
            match chars.next()? {
                '\n' => {
                    line += 1;
                    column = 0;
                }
                _ => column += 1,
            }
        }
        Some(TextPosition {
            index,
            line,
            column,
        })
    }

    /// Character index of `column` on zero-based `line`
    ///
    /// The column is clamped to the line length.
    #[must_use]
    pub fn index_of(&self, line: usize, column: usize) -> Option<usize> {
        let mut index = 0;
        for (n, text) in self.text.split('\n').enumerate() {
            let len = text.chars().count();
            if n == line {
                return Some(index + column.min(len));
            }
            index += len + 1;
        }
        None
    }

    /// Extract up to `context_chars` characters before `index`
    ///
    /// `index` is clamped to the end of the text.
    #[must_use]
    pub fn click_context(&self, index: usize, context_chars: usize) -> ClickContext {
        let end = index.min(self.char_len());
        let start = end.saturating_sub(context_chars);
        let context_text: String = self.text.chars().skip(start).take(end - start).collect();

        ClickContext {
            text_index: end,
            context_start: start,
            context_end: end,
            context_text: context_text.trim().to_string(),
        }
    }

    /// Accept generated text at `position`
    ///
    /// A block already at the same position is replaced.
    pub fn insert_block(
        &mut self,
        position: usize,
        content: impl Into<String>,
        tags: Vec<String>,
    ) -> &GeneratedBlock {
        let block = GeneratedBlock {
            id: Uuid::new_v4(),
            position,
            content: content.into(),
            timestamp: Utc::now(),
            tags,
        };
        tracing::debug!(id = %block.id, position, "Inserted generated block");
        self.blocks.insert(position, block);
        &self.blocks[&position]
    }

    /// Remove a block by id
    pub fn remove_block(&mut self, id: Uuid) -> Option<GeneratedBlock> {
        let position = self
            .blocks
            .values()
            .find(|block| block.id == id)
            .map(|block| block.position)?;
        self.blocks.remove(&position)
    }

    /// Drop every generated block
    pub fn clear_blocks(&mut self) {
        self.blocks.clear();
    }

    /// Generated blocks ordered by position
    pub fn blocks(&self) -> impl Iterator<Item = &GeneratedBlock> {
        self.blocks.values()
    }

    /// Render the text with each block placed after the line containing
    /// its position
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.text.len() + self.blocks.values().map(|b| b.content.len() + 1).sum::<usize>(),
        );
        let mut blocks = self.blocks.values().peekable();
        let mut line_start = 0;
        let mut lines = self.text.split('\n').peekable();

        while let Some(line) = lines.next() {
            let line_end = line_start + line.chars().count();
            let last = lines.peek().is_none();

            out.push_str(line);
            while let Some(block) = blocks.next_if(|b| last || b.position <= line_end) {
                out.push('\n');
                out.push_str(&block.content);
            }
            if !last {
                out.push('\n');
            }

            // Skip the newline separating this line from the next
            line_start = line_end + 1;
        }

        out
    }
}

fn check_extension(path: &Path) -> Result<(), DocumentError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(DocumentError::UnsupportedExtension(format!(".{ext}")))
    }
}
