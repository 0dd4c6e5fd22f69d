//! Lexical helpers shared by the stats, planning, and guard layers.
//!
//! These are deliberately cheap heuristics over the raw text — no
//! tokenization, no model calls. Lexicons are tuned for the mixed
//! Chinese/English register of the target group chats.

/// Interrogative cues beyond a literal question mark.
const INTERROGATIVES: &[&str] = &[
    "吗", "怎么", "为什么", "为啥", "什么", "啥", "谁", "哪", "如何", "多少", "几点", "行不行",
    "是不是", "有没有", "能不能", "how", "why", "what", "when", "where", "who", "which",
];

/// Markers of strong emotion that justify breaking a cooldown.
const STRONG_EMOTION: &[&str] = &[
    "！！", "!!", "气死", "崩溃", "救命", "绝了", "疯了", "卧槽", "天哪", "我哭了", "急死",
    "😭", "😡", "🤬", "💢",
];

/// Help-seeking vocabulary.
const HELP_WORDS: &[&str] = &[
    "求助", "帮忙", "请问", "怎么办", "有人知道", "有大佬", "求教", "急", "help", "跪求",
];

/// Meme / laughter lexicon. Doubles as the laughter detector for topic
/// summaries.
const MEME_TOKENS: &[&str] = &[
    "哈哈", "hhh", "hh", "233", "草", "笑死", "xswl", "666", "lol", "lmao", "绝绝子", "蚌埠住",
    "🤣", "😂", "🐶", "doge",
];

/// Keywords that mark a topic the bot cares about.
const TOPIC_KEYWORDS: &[&str] = &[
    "游戏", "开黑", "上分", "工作", "上班", "摸鱼", "学习", "考试", "吃什么", "外卖", "电影",
    "番", "音乐", "歌", "旅游", "出去玩",
];

/// Lowercase and strip all whitespace, for echo/repetition comparison.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Character count (not bytes) — all length thresholds are in characters.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// A question mark or an interrogative token anywhere in the text.
pub fn is_question(text: &str) -> bool {
    if text.contains('?') || text.contains('？') {
        return true;
    }
    let lower = text.to_lowercase();
    INTERROGATIVES.iter().any(|w| lower.contains(w))
}

pub fn has_strong_emotion(text: &str) -> bool {
    STRONG_EMOTION.iter().any(|w| text.contains(w))
}

pub fn has_help_words(text: &str) -> bool {
    let lower = text.to_lowercase();
    HELP_WORDS.iter().any(|w| lower.contains(w))
}

pub fn has_meme_tokens(text: &str) -> bool {
    let lower = text.to_lowercase();
    MEME_TOKENS.iter().any(|w| lower.contains(w))
}

pub fn has_topic_keywords(text: &str) -> bool {
    TOPIC_KEYWORDS.iter().any(|w| text.contains(w))
}

/// True when the text carries no letters, digits, or CJK at all.
pub fn is_punctuation_only(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| !c.is_alphanumeric())
}

/// Fraction of characters that are emoji-plane symbols.
pub fn emoji_density(text: &str) -> f64 {
    let total = char_len(text);
    if total == 0 {
        return 0.0;
    }
    let emoji = text.chars().filter(|c| is_emoji(*c)).count();
    emoji as f64 / total as f64
}

fn is_emoji(c: char) -> bool {
    matches!(u32::from(c),
        0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0xFE0F | 0x1F1E6..=0x1F1FF)
}

/// Clamp to the unit interval. Every derived score in the stats and
/// planning layers passes through this.
pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_whitespace_and_case() {
        assert_eq!(normalize("  Ha Ha  "), "haha");
        assert_eq!(normalize("哈 哈"), "哈哈");
    }

    #[test]
    fn question_detection_covers_both_marks_and_lexicon() {
        assert!(is_question("在吗"));
        assert!(is_question("why though"));
        assert!(is_question("真的?"));
        assert!(is_question("真的？"));
        assert!(!is_question("晚安"));
    }

    #[test]
    fn punctuation_only_detection() {
        assert!(is_punctuation_only("。。。"));
        assert!(is_punctuation_only("?!"));
        assert!(!is_punctuation_only("好?"));
        assert!(!is_punctuation_only("   "));
    }

    #[test]
    fn emoji_density_counts_emoji_plane() {
        assert!(emoji_density("🤣🤣") > 0.99);
        assert!(emoji_density("哈哈") < 0.01);
        let mixed = emoji_density("好🤣");
        assert!(mixed > 0.4 && mixed < 0.6);
    }

    #[test]
    fn strong_emotion_and_help_words() {
        assert!(has_strong_emotion("气死我了"));
        assert!(has_strong_emotion("不会吧！！"));
        assert!(!has_strong_emotion("平平无奇"));
        assert!(has_help_words("请问这个怎么配"));
        assert!(!has_help_words("今天天气不错"));
    }

    #[test]
    fn clamp01_bounds() {
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp01(1.5), 1.0);
        assert_eq!(clamp01(0.42), 0.42);
    }
}
