//! Structure-aware chunker for prose with headings and paragraphs.

use crate::models::ChunkMeta;

use super::ChunkPiece;

/// Split prose on structural boundaries.
///
/// The scanner walks line by line and closes the current chunk at a heading
/// or at a blank-to-text paragraph transition, but only once the chunk holds
/// at least `min_size` bytes and has reached `target_size`. The next chunk is
/// seeded with the last `overlap_lines` lines of the previous one for
/// continuity. A safety valve force-splits at `1.5 * target_size` even
/// without a structural boundary. The trailing partial chunk is always
/// flushed; empty chunks are filtered.
pub fn chunk_prose(
    text: &str,
    target_size: usize,
    min_size: usize,
    overlap_lines: usize,
) -> Vec<ChunkPiece> {
    let hard_limit = target_size + target_size / 2;
    let mut pieces: Vec<ChunkPiece> = Vec::new();

    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;
    let mut start_line = 1usize;
    let mut heading: Option<String> = None;
    let mut prev_blank = false;

    let flush = |pieces: &mut Vec<ChunkPiece>,
                 current: &mut Vec<String>,
                 current_len: &mut usize,
                 start_line: &mut usize,
                 heading: &mut Option<String>,
                 end_line: usize,
                 next_start: usize| {
        let body = current.join("\n");
        if !body.trim().is_empty() {
            pieces.push(ChunkPiece {
                text: body,
                meta: ChunkMeta {
                    strategy: "prose".to_string(),
                    start_line: Some(*start_line),
                    end_line: Some(end_line),
                    heading: heading.take(),
                    ..ChunkMeta::default()
                },
            });
        } else {
            *heading = None;
        }
        current.clear();
        *current_len = 0;
        *start_line = next_start;
    };

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let blank = line.trim().is_empty();
        let boundary = is_heading(line) || (prev_blank && !blank);

        if boundary && current_len >= min_size && current_len >= target_size {
            let seed: Vec<String> = current
                .iter()
                .rev()
                .take(overlap_lines)
                .rev()
                .cloned()
                .collect();
            flush(
                &mut pieces,
                &mut current,
                &mut current_len,
                &mut start_line,
                &mut heading,
                line_no.saturating_sub(1),
                line_no.saturating_sub(seed.len()),
            );
            current_len = seed.iter().map(|l| l.len() + 1).sum();
            current = seed;
        }

        if is_heading(line) && heading.is_none() {
            heading = Some(line.trim_start_matches('#').trim().to_string());
        }

        current_len += line.len() + 1;
        current.push(line.to_string());
        prev_blank = blank;

        // Safety valve: never let a chunk grow without bound just because
        // the text lacks structure.
        if current_len > hard_limit {
            flush(
                &mut pieces,
                &mut current,
                &mut current_len,
                &mut start_line,
                &mut heading,
                line_no,
                line_no + 1,
            );
        }
    }

    let total_lines = text.lines().count();
    flush(
        &mut pieces,
        &mut current,
        &mut current_len,
        &mut start_line,
        &mut heading,
        total_lines,
        total_lines + 1,
    );

    pieces
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') && trimmed.chars().take_while(|c| *c == '#').count() <= 6
}
