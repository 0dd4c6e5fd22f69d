//! Spam taxonomy over a member's recent-message window.
//!
//! Classification runs only when the window holds at least 3 messages
//! (2-minute window); quieter members are always `Normal`. The three
//! sub-scores are checked in a fixed order and the first threshold crossed
//! wins: noise > 0.6, help-seeking > 0.5, meme-play > 0.5.

use serde::Serialize;

use banter_core::text::{
    char_len, clamp01, emoji_density, has_help_words, has_meme_tokens, is_punctuation_only,
    is_question,
};

use crate::member::RecentMessage;

/// Minimum window size before classification kicks in.
const MIN_BURST: usize = 3;

const NOISE_THRESHOLD: f64 = 0.6;
const HELP_THRESHOLD: f64 = 0.5;
const MEME_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamType {
    Normal,
    HelpSeeking,
    MemePlay,
    Noise,
}

/// Classify a member's recent window. `group_meme` is the group echo score
/// for the newest text, which feeds the meme-play sub-score.
pub(crate) fn classify(window: &[&RecentMessage], group_meme: f64) -> SpamType {
    if window.len() < MIN_BURST {
        return SpamType::Normal;
    }

    if noise_score(window) > NOISE_THRESHOLD {
        return SpamType::Noise;
    }
    if help_score(window) > HELP_THRESHOLD {
        return SpamType::HelpSeeking;
    }
    if meme_score(window, group_meme) > MEME_THRESHOLD {
        return SpamType::MemePlay;
    }
    SpamType::Normal
}

/// Content-free chatter: punctuation bursts, one-character spam, raw rate.
fn noise_score(window: &[&RecentMessage]) -> f64 {
    let n = window.len() as f64;
    let frac_punct = window
        .iter()
        .filter(|m| is_punctuation_only(&m.text))
        .count() as f64
        / n;
    let frac_short = window.iter().filter(|m| char_len(&m.text) <= 3).count() as f64 / n;
    let burst = clamp01(n / 8.0);
    clamp01(0.4 * frac_punct + 0.3 * frac_short + 0.3 * burst)
}

/// Repeated questions and explicit help vocabulary.
fn help_score(window: &[&RecentMessage]) -> f64 {
    let n = window.len() as f64;
    let frac_question = window.iter().filter(|m| is_question(&m.text)).count() as f64 / n;
    let any_help = window.iter().any(|m| has_help_words(&m.text));
    let avg_len =
        window.iter().map(|m| char_len(&m.text)).sum::<usize>() as f64 / n;
    clamp01(
        0.45 * frac_question + if any_help { 0.4 } else { 0.0 } + 0.15 * clamp01(avg_len / 20.0),
    )
}

/// Laughter lexicon, emoji walls, and group-wide echoes.
fn meme_score(window: &[&RecentMessage], group_meme: f64) -> f64 {
    let n = window.len() as f64;
    let frac_meme = window.iter().filter(|m| has_meme_tokens(&m.text)).count() as f64 / n;
    let avg_emoji =
        window.iter().map(|m| emoji_density(&m.text)).sum::<f64>() / n;
    clamp01(0.55 * frac_meme + 0.25 * avg_emoji + 0.2 * group_meme)
}
