//! Per-segment change records
//!
//! Compares a segment's source with its optimized result on a token level
//! (words, single CJK characters, punctuation and whitespace runs) and
//! reports the differing runs as insert / delete / replace edits.

use serde::Serialize;

/// Above this many DP cells the segment is reported as one replacement
const MAX_DIFF_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

/// One contiguous difference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextEdit {
    pub kind: EditKind,
    /// Character offset in the original text
    pub position: usize,
    pub original: String,
    pub replacement: String,
}

/// Original vs optimized text of one `done` segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub segment_index: usize,
    pub original: String,
    pub optimized: String,
    /// Normalized Levenshtein similarity, 1.0 for identical text
    pub similarity: f64,
    pub edits: Vec<TextEdit>,
}

pub fn compare(segment_index: usize, original: &str, optimized: &str) -> ChangeRecord {
    ChangeRecord {
        segment_index,
        original: original.to_string(),
        optimized: optimized.to_string(),
        similarity: strsim::normalized_levenshtein(original, optimized),
        edits: diff(original, optimized),
    }
}

/// Split text into diff tokens
fn tokenize(text: &str) -> Vec<&str> {
    fn is_word_char(c: char) -> bool {
        (c.is_alphanumeric() || c == '_' || c == '\'') && (c as u32) < 0x2E80
    }

    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let mut end = start + c.len_utf8();
        if is_word_char(c) || c.is_whitespace() {
            let whitespace = c.is_whitespace();
            while let Some(&(pos, next)) = chars.peek() {
                let same_class = if whitespace {
                    next.is_whitespace()
                } else {
                    is_word_char(next)
                };
                if !same_class {
                    break;
                }
                end = pos + next.len_utf8();
                chars.next();
            }
        }
        tokens.push(&text[start..end]);
    }
    tokens
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

fn diff(original: &str, optimized: &str) -> Vec<TextEdit> {
    if original == optimized {
        return Vec::new();
    }

    let a = tokenize(original);
    let b = tokenize(optimized);

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    let position: usize = a[..prefix].iter().map(|t| t.chars().count()).sum();

    let cells = (a_mid.len() + 1).saturating_mul(b_mid.len() + 1);
    if cells > MAX_DIFF_CELLS {
        return vec![TextEdit {
            kind: EditKind::Replace,
            position,
            original: a_mid.concat(),
            replacement: b_mid.concat(),
        }];
    }

    group_edits(a_mid, b_mid, &lcs_script(a_mid, b_mid), position)
}

/// Edit script from a longest-common-subsequence table
fn lcs_script(a: &[&str], b: &[&str]) -> Vec<Op> {
    let width = b.len() + 1;
    let mut table = vec![0u32; (a.len() + 1) * width];

    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat(Op::Delete).take(a.len() - i));
    ops.extend(std::iter::repeat(Op::Insert).take(b.len() - j));
    ops
}

/// Collapse runs of non-equal operations into edits
fn group_edits(a: &[&str], b: &[&str], ops: &[Op], base_position: usize) -> Vec<TextEdit> {
    let mut edits = Vec::new();
    let (mut i, mut j) = (0, 0);
    let mut position = base_position;
    let mut pending: Option<(usize, String, String)> = None;

    let flush = |pending: &mut Option<(usize, String, String)>, edits: &mut Vec<TextEdit>| {
        if let Some((at, original, replacement)) = pending.take() {
            let kind = match (original.is_empty(), replacement.is_empty()) {
                (true, _) => EditKind::Insert,
                (_, true) => EditKind::Delete,
                _ => EditKind::Replace,
            };
            edits.push(TextEdit {
                kind,
                position: at,
                original,
                replacement,
            });
        }
    };

    for op in ops {
        match op {
            Op::Equal => {
                flush(&mut pending, &mut edits);
                position += a[i].chars().count();
                i += 1;
                j += 1;
            }
            Op::Delete => {
                let entry = pending.get_or_insert_with(|| (position, String::new(), String::new()));
                entry.1.push_str(a[i]);
                position += a[i].chars().count();
                i += 1;
            }
            Op::Insert => {
                let entry = pending.get_or_insert_with(|| (position, String::new(), String::new()));
                entry.2.push_str(b[j]);
                j += 1;
            }
        }
    }
    flush(&mut pending, &mut edits);
    edits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_has_no_edits() {
        let record = compare(0, "Same text.", "Same text.");
        assert!(record.edits.is_empty());
        assert_eq!(record.similarity, 1.0);
    }

    #[test]
    fn test_word_replacement() {
        let record = compare(3, "The results was good.", "The results were good.");
        assert_eq!(record.segment_index, 3);
        assert_eq!(
            record.edits,
            vec![TextEdit {
                kind: EditKind::Replace,
                position: 12,
                original: "was".into(),
                replacement: "were".into(),
            }]
        );
        assert!(record.similarity > 0.8 && record.similarity < 1.0);
    }

    #[test]
    fn test_insert_and_delete() {
        let inserted = compare(0, "We show it.", "We clearly show it.");
        assert_eq!(inserted.edits.len(), 1);
        assert_eq!(inserted.edits[0].kind, EditKind::Insert);
        assert_eq!(inserted.edits[0].replacement, "clearly ");

        let deleted = compare(0, "We clearly show it.", "We show it.");
        assert_eq!(deleted.edits.len(), 1);
        assert_eq!(deleted.edits[0].kind, EditKind::Delete);
        assert_eq!(deleted.edits[0].original, "clearly ");
    }

    #[test]
    fn test_cjk_characters_are_separate_tokens() {
        assert_eq!(tokenize("方法有效"), vec!["方", "法", "有", "效"]);
        let record = compare(0, "该方法有效。", "该方法十分有效。");
        assert_eq!(record.edits.len(), 1);
        assert_eq!(record.edits[0].kind, EditKind::Insert);
        assert_eq!(record.edits[0].position, 3);
        assert_eq!(record.edits[0].replacement, "十分");
    }

    #[test]
    fn test_tokenize_keeps_every_character() {
        let text = "Hello,  world!\n第二行 don't_stop";
        assert_eq!(tokenize(text).concat(), text);
    }
}
