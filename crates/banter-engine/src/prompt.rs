//! Prompt assembly: one system message carrying the persona, one user
//! message built from ordered sections.
//!
//! Section order is fixed: INSTRUCTION, STYLE, SUMMARY, MEMORY,
//! HISTORICAL, NEW_WINDOW, TARGET. Empty sections are omitted. Turn lines
//! render as `{name}: {text}` with the bot shown as `你`, stored newlines
//! escaped, and remembered @-mentions made explicit.

use banter_core::config::PersonaConfig;
use banter_core::{ChatTurn, Role};

use crate::context::ReplyContext;
use crate::ports::ChatMessage;
use crate::style::DynamicStyleParams;

/// The optional pieces of the `[STYLE]` line; unset fields are omitted.
#[derive(Debug, Clone, Default)]
pub struct StyleHint {
    pub tone: Option<String>,
    pub slang: Option<f64>,
    pub intimacy: Option<f64>,
}

impl From<&DynamicStyleParams> for StyleHint {
    fn from(style: &DynamicStyleParams) -> Self {
        Self {
            tone: Some(style.tone.to_string()),
            slang: Some(style.slang),
            intimacy: Some(style.intimacy),
        }
    }
}

const INSTRUCTION: &str = "[INSTRUCTION]\n\
1. 只回复 TARGET 中的那条消息。\n\
2. HISTORICAL 和 NEW_WINDOW 只是背景，不要逐条回应。\n\
3. 严格按照 STYLE 的语气说话。\n\
4. 需要分条发送时用 <brk> 分隔，最多 3 段；只输出要发送的内容本身，不要输出换行。";

pub struct PromptBuilder {
    persona: PersonaConfig,
}

impl PromptBuilder {
    pub fn new(persona: PersonaConfig) -> Self {
        Self { persona }
    }

    /// The persona system message.
    pub fn build_system(&self) -> String {
        let mut out = format!(
            "你是 {}, {}\n人设风格：{}\n语言约束：禁止AI腔、讲大道理、格式化、分点、括号动作",
            self.persona.name, self.persona.description, self.persona.tone
        );
        for line in &self.persona.constraints {
            out.push('\n');
            out.push_str(line);
        }
        out
    }

    /// `[system, user]` for one reply.
    pub fn build_messages(
        &self,
        ctx: &ReplyContext,
        style: &StyleHint,
        memory: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut sections: Vec<String> = vec![INSTRUCTION.to_string()];

        if let Some(style_line) = render_style(style) {
            sections.push(style_line);
        }
        if let Some(topic) = ctx.topic_summary {
            sections.push(format!("[SUMMARY] {topic}"));
        }
        if let Some(memory) = memory {
            if !memory.is_empty() {
                sections.push(format!("[MEMORY] {memory}"));
            }
        }

        let (historical, new_window) = split_windows(&ctx.recent_turns);
        if !historical.is_empty() {
            sections.push(render_window("[HISTORICAL]", historical));
        }
        if !new_window.is_empty() {
            sections.push(render_window("[NEW_WINDOW]", new_window));
        }
        if let Some(target) = &ctx.target_turn {
            sections.push(format!("[TARGET]\n{}", render_turn(target)));
        }

        vec![
            ChatMessage::system(self.build_system()),
            ChatMessage::user(sections.join("\n\n")),
        ]
    }
}

/// HISTORICAL runs through the last bot turn; NEW_WINDOW is everything
/// after it. With no bot turn in the slice, everything is new.
fn split_windows(turns: &[ChatTurn]) -> (&[ChatTurn], &[ChatTurn]) {
    match turns.iter().rposition(|t| t.role == Role::Bot) {
        Some(i) => (&turns[..=i], &turns[i + 1..]),
        None => (&[], turns),
    }
}

fn render_window(header: &str, turns: &[ChatTurn]) -> String {
    let mut out = String::from(header);
    for turn in turns {
        out.push('\n');
        out.push_str(&render_turn(turn));
    }
    out
}

fn render_turn(turn: &ChatTurn) -> String {
    let name = match turn.role {
        Role::Bot => "你",
        Role::User => turn.display_name(),
    };
    let mut text = turn.content.replace('\n', "\\n");
    if turn.mentions_bot && !text.contains("@你") {
        text = format!("@你 {text}");
    }
    format!("{name}: {text}")
}

fn render_style(style: &StyleHint) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(tone) = &style.tone {
        parts.push(format!("tone={tone}"));
    }
    if let Some(slang) = style.slang {
        parts.push(format!("slang={slang:.2}"));
    }
    if let Some(intimacy) = style.intimacy {
        parts.push(format!("intimacy={intimacy:.2}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("[STYLE] {}", parts.join("; ")))
    }
}

/// Flattened single-string view of the assembled prompt, for the debug
/// surface.
pub fn flatten(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("<{:?}>\n{}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
