//! Level planning and page-based chunking for multi-level summaries.
//!
//! A level decides how many source pages go into one chunk. Low levels use
//! large chunks (a general summary); higher levels use smaller chunks and so
//! produce a more detailed result once the chunk summaries are concatenated.

use serde::Serialize;

/// Highest level with a distinct chunking strategy. Higher requests clamp here.
pub const MAX_PLANNED_LEVEL: u8 = 4;

/// Characters from the end of a chunk searched for a sentence boundary.
const SENTENCE_SEARCH_WINDOW: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelPlan {
    pub level: u8,
    pub description: String,
    pub pages_per_chunk: usize,
    pub estimated_chunks: usize,
}

/// Choose the chunk size for `level` over a document of `total_pages`.
pub fn plan_level(total_pages: usize, level: u8) -> LevelPlan {
    let level = level.clamp(1, MAX_PLANNED_LEVEL);
    let pages = total_pages as f64;
    let at_least = |min: f64, value: f64| min.max(value).floor() as usize;

    let pages_per_chunk = if total_pages <= 20 {
        match level {
            1 => at_least(1.0, pages / 2.0),
            4 => at_least(1.0, pages / 4.0),
            _ => {
                let ratio = f64::from(level - 1) / 3.0;
                at_least(1.0, pages * (0.1 + ratio * 0.4))
            }
        }
    } else if total_pages <= 100 {
        match level {
            1 => at_least(3.0, pages / 3.0),
            4 => at_least(3.0, pages / 8.0),
            _ => at_least(2.0, pages / f64::from(3 + (level - 1))),
        }
    } else {
        match level {
            1 => at_least(5.0, pages / 5.0),
            2 => at_least(4.0, pages / 8.0),
            3 => at_least(3.0, pages / 12.0),
            _ => at_least(3.0, pages / 15.0),
        }
    };
    let pages_per_chunk = pages_per_chunk.min(total_pages);

    let estimated_chunks = if pages_per_chunk == 0 {
        1
    } else {
        total_pages.div_ceil(pages_per_chunk)
    };

    LevelPlan {
        level,
        description: format!(
            "Level {level} summary ({pages_per_chunk} pages per chunk, ~{estimated_chunks} chunks)"
        ),
        pages_per_chunk,
        estimated_chunks,
    }
}

/// Split `text` into chunks of roughly `pages_per_chunk` pages, preferring to
/// cut after the last sentence end near each chunk boundary.
pub fn chunk_text_by_pages(text: &str, total_pages: usize, pages_per_chunk: usize) -> Vec<String> {
    if total_pages == 0 || pages_per_chunk == 0 {
        return vec![text.to_string()];
    }

    let chunk_size = (text.len() / total_pages) * pages_per_chunk;
    if chunk_size == 0 || chunk_size >= text.len() {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = floor_char_boundary(text, (start + chunk_size).min(text.len()));
        if end <= start {
            end = ceil_char_boundary(text, start + 1);
        }

        if end < text.len() {
            let window = &text[start..end];
            let search_from = floor_char_boundary(
                window,
                window
                    .len()
                    .saturating_sub(SENTENCE_SEARCH_WINDOW)
                    .max(window.len() / 2),
            );
            if let Some(pos) = window[search_from..].rfind(['.', '?', '!']) {
                if pos > 0 {
                    end = start + search_from + pos + 1;
                }
            }
        }

        let chunk = text[start..end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        start = end;
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }

    tracing::debug!(
        chars = text.len(),
        total_pages,
        pages_per_chunk,
        chunk_size,
        chunks = chunks.len(),
        "Text chunked by pages"
    );
    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}
