//! Per-mode speaking style, blended with live intimacy and energy.
//!
//! The table gives each register a baseline; energy scales how wordy the
//! bot is willing to be, intimacy how readily it splits a thought across
//! messages.

use banter_core::text::clamp01;

use crate::planner::ReplyMode;

/// Knobs consumed by the prompt builder and the utterance planner.
#[derive(Debug, Clone)]
pub struct DynamicStyleParams {
    pub tone: &'static str,
    pub slang: f64,
    pub intimacy: f64,
    pub verbosity: f64,
    pub multi_utterance_preference: f64,
}

/// Baseline (tone, slang, verbosity, multi-utterance preference).
fn table(mode: ReplyMode) -> (&'static str, f64, f64, f64) {
    match mode {
        ReplyMode::Smalltalk => ("轻松闲聊", 0.5, 0.5, 0.5),
        ReplyMode::Casual => ("随意搭话", 0.5, 0.4, 0.4),
        ReplyMode::Fragment => ("碎碎念", 0.6, 0.15, 0.2),
        ReplyMode::DirectAnswer => ("认真回答", 0.2, 0.7, 0.3),
        ReplyMode::PassiveAcknowledge => ("淡淡附和", 0.4, 0.1, 0.1),
        ReplyMode::PlayfulTease => ("玩梗调侃", 0.8, 0.5, 0.6),
        ReplyMode::EmpathySupport => ("温柔安慰", 0.3, 0.6, 0.4),
        ReplyMode::Deflect => ("打个哈哈带过", 0.6, 0.2, 0.2),
        // Never rendered; commands and skips bypass the prompt entirely.
        ReplyMode::Command | ReplyMode::Ignore => ("随意搭话", 0.5, 0.4, 0.4),
    }
}

/// Blend the mode baseline with the member's intimacy, current energy,
/// and the persona's configured slang level.
pub fn style_for(
    mode: ReplyMode,
    intimacy: f64,
    energy: f64,
    persona_slang: Option<f64>,
) -> DynamicStyleParams {
    let (tone, slang0, verbosity0, multi0) = table(mode);
    let slang = match persona_slang {
        Some(p) => clamp01(0.6 * slang0 + 0.4 * p),
        None => slang0,
    };
    DynamicStyleParams {
        tone,
        slang,
        intimacy,
        verbosity: clamp01(verbosity0 * (0.6 + 0.4 * energy)),
        multi_utterance_preference: clamp01(multi0 + 0.2 * (intimacy - 0.5)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_scales_verbosity() {
        let tired = style_for(ReplyMode::Casual, 0.5, 0.0, None);
        let fresh = style_for(ReplyMode::Casual, 0.5, 1.0, None);
        assert!(fresh.verbosity > tired.verbosity);
        assert!((fresh.verbosity - 0.4).abs() < 1e-9);
    }

    #[test]
    fn intimacy_shifts_multi_preference() {
        let stranger = style_for(ReplyMode::Smalltalk, 0.1, 1.0, None);
        let friend = style_for(ReplyMode::Smalltalk, 0.9, 1.0, None);
        assert!(friend.multi_utterance_preference > stranger.multi_utterance_preference);
    }

    #[test]
    fn persona_slang_blends_in() {
        let plain = style_for(ReplyMode::DirectAnswer, 0.5, 1.0, None);
        let slangy = style_for(ReplyMode::DirectAnswer, 0.5, 1.0, Some(1.0));
        assert!(slangy.slang > plain.slang);
    }

    #[test]
    fn all_knobs_stay_in_unit_interval() {
        for mode in [
            ReplyMode::Smalltalk,
            ReplyMode::Casual,
            ReplyMode::Fragment,
            ReplyMode::DirectAnswer,
            ReplyMode::PassiveAcknowledge,
            ReplyMode::PlayfulTease,
            ReplyMode::EmpathySupport,
            ReplyMode::Deflect,
        ] {
            let s = style_for(mode, 1.0, 1.0, Some(1.0));
            assert!((0.0..=1.0).contains(&s.verbosity));
            assert!((0.0..=1.0).contains(&s.multi_utterance_preference));
            assert!((0.0..=1.0).contains(&s.slang));
        }
    }
}
