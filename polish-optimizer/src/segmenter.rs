//! Document segmentation and reassembly
//!
//! A document is cut into contiguous segments that never exceed the policy's
//! character limit. Each segment records the whitespace that followed it, so
//! for any split
//!
//! `concat(segment.source + segment.separator) == document`
//!
//! and reassembly is the same concatenation over the optimized results.
//!
//! Cut preference, from best to worst:
//! 1. paragraph breaks (whitespace runs with two or more newlines)
//! 2. sentence terminators
//! 3. any whitespace
//! 4. a hard cut at the character limit
//!
//! Consecutive small paragraphs are packed into one segment while the packed
//! text stays within the limit.

use polish_common::events::SegmentStatus;
use thiserror::Error;

use crate::models::Segment;

/// Characters that end a sentence (ASCII and full-width)
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；'];

/// How a document is cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPolicy {
    /// Maximum characters per segment source
    pub max_chars: usize,
}

impl SplitPolicy {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

/// Reassembly attempted before every segment has a result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("segment {index} has no result (status {status:?})")]
    Incomplete { index: usize, status: SegmentStatus },
}

/// Byte range of one unit: `start..text_end` is text, `text_end..end` separator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    text_end: usize,
    end: usize,
}

/// Split `document` into pending segments
///
/// Returns no segments for a blank document.
pub fn split(document: &str, policy: &SplitPolicy) -> Vec<Segment> {
    let max_chars = policy.max_chars.max(1);

    let pieces: Vec<Span> = paragraph_spans(document)
        .into_iter()
        .flat_map(|span| cut_oversized(document, span, max_chars))
        .collect();

    pack(document, pieces, max_chars)
        .into_iter()
        .enumerate()
        .map(|(index, span)| {
            Segment::new(
                index,
                &document[span.start..span.text_end],
                &document[span.text_end..span.end],
            )
        })
        .collect()
}

/// Concatenate every segment's result followed by its separator
pub fn reassemble(segments: &[Segment]) -> Result<String, AssemblyError> {
    let mut document = String::new();
    for segment in segments {
        match (&segment.status, &segment.result) {
            (SegmentStatus::Done, Some(result)) => {
                document.push_str(result);
                document.push_str(&segment.separator);
            }
            _ => {
                return Err(AssemblyError::Incomplete {
                    index: segment.index,
                    status: segment.status,
                })
            }
        }
    }
    Ok(document)
}

/// Paragraph units
///
/// Leading whitespace stays with the first unit; the whitespace run at the
/// end of the document becomes the last unit's separator.
fn paragraph_spans(document: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut unit_start = 0;
    let mut seen_text = false;
    let mut chars = document.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if !c.is_whitespace() {
            seen_text = true;
            continue;
        }

        let run_start = pos;
        let mut newlines = usize::from(c == '\n');
        let mut run_end = pos + c.len_utf8();
        while let Some(&(next_pos, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            if next == '\n' {
                newlines += 1;
            }
            run_end = next_pos + next.len_utf8();
            chars.next();
        }

        let at_end = run_end == document.len();
        if seen_text && (newlines >= 2 || at_end) {
            spans.push(Span {
                start: unit_start,
                text_end: run_start,
                end: run_end,
            });
            unit_start = run_end;
            seen_text = false;
        }
    }

    if seen_text {
        spans.push(Span {
            start: unit_start,
            text_end: document.len(),
            end: document.len(),
        });
    }
    spans
}

/// Cut a unit whose text exceeds `max_chars` into pieces that fit
fn cut_oversized(document: &str, span: Span, max_chars: usize) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut start = span.start;

    loop {
        let text = &document[start..span.text_end];
        let window_end = match text.char_indices().nth(max_chars) {
            Some((offset, _)) => start + offset,
            None => {
                pieces.push(Span {
                    start,
                    text_end: span.text_end,
                    end: span.end,
                });
                return pieces;
            }
        };

        let window = &document[start..window_end];
        let cut = sentence_cut(window)
            .filter(|&cut| cut * 2 >= window.len())
            .or_else(|| whitespace_cut(window))
            .or_else(|| sentence_cut(window))
            .unwrap_or(window.len());

        let piece_end = start + cut;
        let separator_len: usize = document[piece_end..span.text_end]
            .chars()
            .take_while(|c| c.is_whitespace())
            .map(char::len_utf8)
            .sum();
        let next_start = piece_end + separator_len;

        if next_start >= span.text_end {
            pieces.push(Span {
                start,
                text_end: piece_end,
                end: span.end,
            });
            return pieces;
        }

        pieces.push(Span {
            start,
            text_end: piece_end,
            end: next_start,
        });
        start = next_start;
    }
}

/// Byte offset just after the last sentence terminator, if not at the start
fn sentence_cut(window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(_, c)| SENTENCE_TERMINATORS.contains(c))
        .last()
        .map(|(pos, c)| pos + c.len_utf8())
        .filter(|&cut| cut > 0)
}

/// Byte offset where the last whitespace run of the window begins
fn whitespace_cut(window: &str) -> Option<usize> {
    let mut run_start = None;
    let mut in_run = false;
    for (pos, c) in window.char_indices() {
        if c.is_whitespace() {
            if !in_run {
                run_start = Some(pos);
                in_run = true;
            }
        } else {
            in_run = false;
        }
    }
    run_start.filter(|&pos| pos > 0)
}

/// Merge consecutive spans while the merged text fits
fn pack(document: &str, spans: Vec<Span>, max_chars: usize) -> Vec<Span> {
    let mut packed: Vec<(Span, usize)> = Vec::with_capacity(spans.len());

    for span in spans {
        let text_chars = document[span.start..span.text_end].chars().count();
        if let Some((last, last_chars)) = packed.last_mut() {
            let gap_chars = document[last.text_end..span.start].chars().count();
            let merged = *last_chars + gap_chars + text_chars;
            if merged <= max_chars {
                last.text_end = span.text_end;
                last.end = span.end;
                *last_chars = merged;
                continue;
            }
        }
        packed.push((span, text_chars));
    }

    packed.into_iter().map(|(span, _)| span).collect()
}
