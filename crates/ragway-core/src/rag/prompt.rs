//! Prompt text and answer language.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful, precise assistant. Cite facts only from the provided CONTEXT.";

const ENGLISH_SYSTEM_PROMPT: &str =
    "Answer precisely and briefly using ONLY the provided context. If insufficient, say so.";
const ARABIC_SYSTEM_PROMPT: &str =
    "أجب بدقة وباختصار اعتمادًا فقط على السياق المرفق. إن لم تكفِ المعلومات فلتصرّح بذلك.";

const ENGLISH_INSUFFICIENT: &str = "Insufficient indexed context to answer this question.";
const ARABIC_INSUFFICIENT: &str = "لا توجد معلومات كافية في الفهرس للإجابة على السؤال.";

/// Marks a system prompt as Arabic ("answer").
const ARABIC_MARKER: &str = "أجب";

/// Answer language requested by the caller. `Auto` answers in English.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Auto,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ar")]
    Arabic,
}

impl Language {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Language::Arabic => ARABIC_SYSTEM_PROMPT,
            Language::Auto | Language::English => ENGLISH_SYSTEM_PROMPT,
        }
    }

    pub fn insufficient_context(&self) -> &'static str {
        match self {
            Language::Arabic => ARABIC_INSUFFICIENT,
            Language::Auto | Language::English => ENGLISH_INSUFFICIENT,
        }
    }

    /// Guess the language from a caller-supplied system prompt.
    pub(crate) fn of_system_prompt(system: Option<&str>) -> Self {
        match system {
            Some(s) if s.contains(ARABIC_MARKER) => Language::Arabic,
            _ => Language::English,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::Auto => "auto",
            Language::English => "en",
            Language::Arabic => "ar",
        })
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Language::Auto),
            "en" | "english" => Ok(Language::English),
            "ar" | "arabic" => Ok(Language::Arabic),
            other => Err(format!("unknown language '{}' (expected auto, en or ar)", other)),
        }
    }
}

/// `[1] first\n[2] second`
pub(crate) fn numbered_context<'a>(texts: impl Iterator<Item = &'a str>) -> String {
    texts
        .enumerate()
        .map(|(i, t)| format!("[{}] {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn user_message(question: &str, context: &str) -> String {
    format!(
        "QUESTION: {}\n\nCONTEXT:\n{}\n\n\
         INSTRUCTIONS: If the answer is not in the context, say you do not have enough information.",
        question, context
    )
}
