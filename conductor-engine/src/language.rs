//! Resolves which language the final result should be written in, working
//! down a priority chain until something decides it (spec §4.7).

use std::sync::Arc;

use conductor_llm::{single_turn, CompletionRequest, LlmClient};
use regex::Regex;
use tracing::debug;

pub const SUPPORTED_LANGUAGES: &[&str] = &["zh", "en", "ja", "ko", "es", "fr", "de", "it", "pt", "ru", "ar"];
const FALLBACK: &str = "en";

#[derive(Debug, Clone, Default)]
pub struct LanguageContext {
    /// An explicit instruction parsed out of the query itself, e.g.
    /// "... respond in French" or "用中文回答".
    pub explicit_instruction: Option<String>,
    /// A language the user pinned for this conversation in an earlier turn.
    pub conversation_override: Option<String>,
    /// The agent's configured default language.
    pub agent_default: Option<String>,
    /// A language hint from the client (`Accept-Language`-style), lowest
    /// priority short of the hardcoded fallback.
    pub browser_hint: Option<String>,
    pub query: String,
}

pub struct LanguageResolver {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LanguageResolver {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Walks the priority chain: explicit instruction (pre-supplied, or
    /// parsed out of the query itself by the LLM), conversation override,
    /// agent default, LLM detection (with a quick-detect fast path for
    /// unambiguous scripts), browser hint, then English.
    pub async fn resolve(&self, ctx: &LanguageContext) -> String {
        if let Some(code) = ctx.explicit_instruction.as_deref().and_then(normalize) {
            debug!(code, "language resolved from explicit instruction");
            return code.to_string();
        }
        if let Some(code) = self.parse_instruction(&ctx.query).await {
            debug!(code, "language resolved from an in-message instruction");
            return code.to_string();
        }
        if let Some(code) = ctx.conversation_override.as_deref().and_then(normalize) {
            debug!(code, "language resolved from conversation override");
            return code.to_string();
        }
        if let Some(code) = ctx.agent_default.as_deref().and_then(normalize) {
            debug!(code, "language resolved from agent default");
            return code.to_string();
        }
        if let Some(code) = quick_detect(&ctx.query) {
            debug!(code, "language resolved via quick-detect");
            return code.to_string();
        }
        if let Some(code) = self.llm_detect(&ctx.query).await {
            debug!(code, "language resolved via LLM detection");
            return code.to_string();
        }
        if let Some(code) = ctx.browser_hint.as_deref().and_then(normalize) {
            debug!(code, "language resolved from browser hint");
            return code.to_string();
        }
        FALLBACK.to_string()
    }

    async fn llm_detect(&self, query: &str) -> Option<String> {
        let request = CompletionRequest::new(
            &self.model,
            single_turn(
                "Identify the language of the user's message. Respond with only the ISO 639-1 code.",
                query,
            ),
        )
        .with_temperature(0.0);
        let response = self.llm.complete(request).await.ok()?;
        normalize(response.content.trim()).map(str::to_string)
    }

    /// Spec §4.7 step 1: `ParseInstruction(text) -> lang`. Asks the model
    /// whether the message itself asks for a reply in a specific language —
    /// in any language, e.g. "answer in English" or "请用英语回答" — and
    /// returns that language's code if so. This is a distinct question from
    /// `llm_detect`'s "what language is this message written in".
    async fn parse_instruction(&self, query: &str) -> Option<String> {
        let request = CompletionRequest::new(
            &self.model,
            single_turn(
                "The user's message may explicitly ask for the reply to be written in a \
                 particular language, regardless of what language the message itself is \
                 written in (e.g. \"answer in English\", \"请用英语回答\", \"responde en \
                 espa\u{f1}ol\"). If it does, respond with only the ISO 639-1 code for that \
                 language. If it does not contain such an instruction, respond with NONE.",
                query,
            ),
        )
        .with_temperature(0.0);
        let response = self.llm.complete(request).await.ok()?;
        let content = response.content.trim();
        if content.eq_ignore_ascii_case("none") {
            return None;
        }
        normalize(content).map(str::to_string)
    }
}

fn normalize(raw: &str) -> Option<&'static str> {
    let lowered = raw.trim().to_lowercase();
    if let Some(code) = SUPPORTED_LANGUAGES.iter().find(|code| lowered == **code) {
        return Some(code);
    }
    let word_pattern = Regex::new(r"[a-z]+").unwrap();
    word_pattern.find_iter(&lowered).find_map(|m| language_name_to_code(m.as_str()))
}

/// Full-name table backing `normalize`'s word-by-word scan, so an explicit
/// instruction phrased as a sentence ("please answer in French") resolves
/// from the embedded language name rather than requiring a bare code.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("zh", "chinese"),
    ("en", "english"),
    ("ja", "japanese"),
    ("ko", "korean"),
    ("es", "spanish"),
    ("fr", "french"),
    ("de", "german"),
    ("it", "italian"),
    ("pt", "portuguese"),
    ("ru", "russian"),
    ("ar", "arabic"),
];

fn language_name_to_code(word: &str) -> Option<&'static str> {
    SUPPORTED_LANGUAGES.iter().find(|code| word == **code).copied().or_else(|| {
        LANGUAGE_NAMES.iter().find(|(_, name)| *name == word).map(|(code, _)| *code)
    })
}

/// Detects scripts that map unambiguously to a single supported language
/// without needing an LLM round trip: CJK, Hangul, Arabic, Cyrillic.
pub fn quick_detect(text: &str) -> Option<&'static str> {
    let han = Regex::new(r"\p{Han}").unwrap();
    let hiragana_katakana = Regex::new(r"[\p{Hiragana}\p{Katakana}]").unwrap();
    let hangul = Regex::new(r"\p{Hangul}").unwrap();
    let arabic = Regex::new(r"\p{Arabic}").unwrap();
    let cyrillic = Regex::new(r"\p{Cyrillic}").unwrap();

    if hiragana_katakana.is_match(text) {
        Some("ja")
    } else if hangul.is_match(text) {
        Some("ko")
    } else if han.is_match(text) {
        Some("zh")
    } else if arabic.is_match(text) {
        Some("ar")
    } else if cyrillic.is_match(text) {
        Some("ru")
    } else {
        None
    }
}
