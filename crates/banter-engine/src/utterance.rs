//! Decides whether a reply goes out as one message or a short volley,
//! and how long to pause between parts.
//!
//! Short or low-energy replies stay single. Longer ones split on sentence
//! punctuation (then on commas for run-on clauses) into 2–4 segments, with
//! trailing sentence punctuation stripped from non-final parts for a
//! casual feel.

use banter_core::text::char_len;

use crate::dice::Dice;

/// One outgoing message in a multi-part reply.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Pause before this segment; the first is always 0.
    pub delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct UtterancePlan {
    pub segments: Vec<Utterance>,
}

impl UtterancePlan {
    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }
}

/// Sentence enders that trigger a split and get stripped from non-final
/// segments.
const SENTENCE_ENDERS: &[char] = &['。', '！', '？', '!', '?'];
/// Clause separators used to break up run-on parts.
const CLAUSE_SEPARATORS: &[char] = &['，', ','];
/// Parts longer than this get clause-split.
const LONG_PART_CHARS: usize = 40;

const SEGMENT_DELAY_BASE_MS: u64 = 400;
const SEGMENT_DELAY_JITTER_MS: u64 = 500;

pub fn plan_utterances(
    text: &str,
    verbosity: f64,
    multi_preference: f64,
    is_at_reply: bool,
    dice: &dyn Dice,
) -> UtterancePlan {
    let len = char_len(text);

    let single = len <= 40
        || (len <= 80 && verbosity < 0.5)
        || (len <= 150 && (verbosity < 0.2 || multi_preference < 0.2))
        || (is_at_reply && len <= 120 && verbosity < 0.6);
    if single {
        return UtterancePlan {
            segments: vec![Utterance {
                text: text.trim().to_string(),
                delay_ms: 0,
            }],
        };
    }

    let parts = atomic_parts(text);
    if parts.len() <= 1 {
        return UtterancePlan {
            segments: vec![Utterance {
                text: text.trim().to_string(),
                delay_ms: 0,
            }],
        };
    }

    let target = target_count(len, verbosity, multi_preference);
    let grouped = regroup(parts, target);
    let last = grouped.len() - 1;

    let segments = grouped
        .into_iter()
        .enumerate()
        .map(|(i, mut text)| {
            if i < last {
                text = text.trim_end_matches(SENTENCE_ENDERS).to_string();
            }
            let delay_ms = if i == 0 {
                0
            } else {
                let base = SEGMENT_DELAY_BASE_MS + dice.jitter(SEGMENT_DELAY_JITTER_MS);
                (base as f64 * (1.0 + 0.3 * verbosity)) as u64
            };
            Utterance { text, delay_ms }
        })
        .collect();

    UtterancePlan { segments }
}

/// Split on sentence enders and newlines, then clause-split long parts.
fn atomic_parts(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut cur = String::new();
    for c in text.chars() {
        if c == '\n' {
            push_part(&mut sentences, &mut cur);
        } else if SENTENCE_ENDERS.contains(&c) {
            cur.push(c);
            push_part(&mut sentences, &mut cur);
        } else {
            cur.push(c);
        }
    }
    push_part(&mut sentences, &mut cur);

    let mut parts = Vec::new();
    for sentence in sentences {
        if char_len(&sentence) <= LONG_PART_CHARS {
            parts.push(sentence);
            continue;
        }
        let mut clause = String::new();
        for c in sentence.chars() {
            if CLAUSE_SEPARATORS.contains(&c) {
                push_part(&mut parts, &mut clause);
            } else {
                clause.push(c);
            }
        }
        push_part(&mut parts, &mut clause);
    }
    parts
}

fn push_part(parts: &mut Vec<String>, cur: &mut String) {
    let trimmed = cur.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    cur.clear();
}

/// 2–4 segments, growing with length and the style knobs.
fn target_count(len: usize, verbosity: f64, multi_preference: f64) -> usize {
    let mut target = 2;
    if len > 100 {
        target += 1;
    }
    if multi_preference > 0.6 || verbosity > 0.7 {
        target += 1;
    }
    target.min(4)
}

/// Merge adjacent parts into at most `target` segments, balanced by
/// character count.
fn regroup(parts: Vec<String>, target: usize) -> Vec<String> {
    if parts.len() <= target {
        return parts;
    }
    let total: usize = parts.iter().map(|p| char_len(p)).sum();
    let budget = total.div_ceil(target);

    let mut grouped: Vec<String> = Vec::with_capacity(target);
    let mut cur = String::new();
    let mut cur_len = 0usize;
    let mut remaining = parts.len();

    for part in parts {
        let part_len = char_len(&part);
        let groups_left = target - grouped.len();
        let must_merge = groups_left >= remaining;
        // The final segment absorbs whatever is left.
        if !cur.is_empty() && !must_merge && cur_len + part_len > budget && grouped.len() + 1 < target
        {
            grouped.push(cur);
            cur = String::new();
            cur_len = 0;
        }
        cur.push_str(&part);
        cur_len += part_len;
        remaining -= 1;
    }
    if !cur.is_empty() {
        grouped.push(cur);
    }
    grouped
}
