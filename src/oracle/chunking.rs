// src/oracle/chunking.rs

/// Texts longer than this (in characters) are split before parsing.
pub const CHUNK_THRESHOLD: usize = 15_000;
const LARGE_INPUT: usize = 25_000;
const CHUNKS_NORMAL: usize = 4;
const CHUNKS_LARGE: usize = 6;
// How far past the naive cut a chunk end may move to land on a boundary.
const SNAP_WINDOW: usize = 500;

/// Separator written in front of every container text.
pub const ITEM_MARKER: &str = "---ITEM---";

/// Splits `text` into contiguous chunks for independent oracle calls.
///
/// Short inputs come back whole. Longer inputs are cut into 4 pieces (6 above
/// 25k characters); each cut moves forward to the next item marker, or failing
/// that to the end of the line holding the next `€`, when one is close.
pub fn split_for_oracle(text: &str) -> Vec<&str> {
    let char_count = text.chars().count();
    if char_count <= CHUNK_THRESHOLD {
        return vec![text];
    }

    let pieces = if char_count > LARGE_INPUT { CHUNKS_LARGE } else { CHUNKS_NORMAL };
    let target = text.len() / pieces;
    let mut chunks = Vec::with_capacity(pieces);
    let mut start = 0;

    for i in 1..pieces {
        let naive = floor_boundary(text, (i * target).max(start));
        let end = snap_end(text, start, naive);
        if end > start {
            chunks.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks.retain(|chunk| !chunk.trim().is_empty());
    tracing::debug!("Split {} chars into {} chunks", char_count, chunks.len());
    chunks
}

fn snap_end(text: &str, start: usize, naive: usize) -> usize {
    let window_end = ceil_boundary(text, (naive + SNAP_WINDOW).min(text.len()));
    let window = &text[naive..window_end];

    // Cut right before a marker so the next chunk opens with it
    if let Some(pos) = window
        .match_indices(ITEM_MARKER)
        .map(|(pos, _)| naive + pos)
        .find(|pos| *pos > start)
    {
        return pos;
    }

    if let Some(euro) = window.find('€') {
        let after_euro = naive + euro + '€'.len_utf8();
        return match text[after_euro..window_end].find('\n') {
            Some(newline) => after_euro + newline + 1,
            None => after_euro,
        };
    }

    naive
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(count: usize, body_len: usize) -> String {
        (0..count)
            .map(|i| format!("{}\nProdotto {} {}\n€{},99", ITEM_MARKER, i, "x".repeat(body_len), i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let text = items(10, 50);
        assert_eq!(split_for_oracle(&text), vec![text.as_str()]);
    }

    #[test]
    fn chunks_cover_input_exactly() {
        let text = items(200, 90);
        assert!(text.chars().count() > CHUNK_THRESHOLD && text.chars().count() <= LARGE_INPUT);

        let chunks = split_for_oracle(&text);
        assert_eq!(chunks.len(), CHUNKS_NORMAL);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn cuts_land_on_item_markers() {
        let text = items(300, 120);
        let chunks = split_for_oracle(&text);
        assert_eq!(chunks.len(), CHUNKS_LARGE);
        for chunk in &chunks {
            assert!(chunk.starts_with(ITEM_MARKER), "{}", &chunk[..40]);
        }
    }

    #[test]
    fn falls_back_to_euro_line_end_without_markers() {
        let line = format!("Articolo {} - €12,50\n", "y".repeat(80));
        let text = line.repeat(200);
        let chunks = split_for_oracle(&text);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with("€12,50\n"));
        }
    }

    #[test]
    fn multibyte_text_never_panics() {
        let text = "è€à".repeat(8_000);
        let chunks = split_for_oracle(&text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }
}
