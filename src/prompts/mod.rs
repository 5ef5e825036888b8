use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tera::{Context as TeraContext, Tera};

const SYSTEM_PRINTED: &str = include_str!("templates/system_printed.tera");
const SYSTEM_HANDWRITING: &str = include_str!("templates/system_handwriting.tera");
const SYSTEM_MIXED: &str = include_str!("templates/system_mixed.tera");
const USER_PROMPT: &str = include_str!("templates/user.tera");

const HANDWRITING_KEYWORDS: &[&str] = &[
    "handwrit", "note", "letter", "diary", "journal", "sketch", "memo",
];
const MIXED_KEYWORDS: &[&str] = &[
    "form",
    "receipt",
    "invoice",
    "annotat",
    "mixed",
    "whiteboard",
];

/// Extraction hint selecting the prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    Printed,
    Handwriting,
    Mixed,
}

impl OcrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Printed => "printed",
            OcrMode::Handwriting => "handwriting",
            OcrMode::Mixed => "mixed",
        }
    }

    /// Guesses the mode from keywords in a file name. Handwriting keywords take
    /// precedence over mixed ones; anything else is treated as printed.
    pub fn infer_from_file_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if HANDWRITING_KEYWORDS
            .iter()
            .any(|keyword| lower.contains(keyword))
        {
            return OcrMode::Handwriting;
        }
        if MIXED_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
            return OcrMode::Mixed;
        }
        OcrMode::Printed
    }

    pub fn confidence_note(&self) -> &'static str {
        match self {
            OcrMode::Printed => {
                "Printed text extraction is typically highly accurate; verify numbers and proper names."
            }
            OcrMode::Handwriting => {
                "Handwriting recognition may contain errors; words marked [illegible] could not be read."
            }
            OcrMode::Mixed => {
                "Printed text is typically accurate; handwritten portions may contain errors."
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            OcrMode::Printed => "printed",
            OcrMode::Handwriting => "handwritten",
            OcrMode::Mixed => "printed and handwritten",
        }
    }

    fn system_template(&self) -> &'static str {
        match self {
            OcrMode::Printed => SYSTEM_PRINTED,
            OcrMode::Handwriting => SYSTEM_HANDWRITING,
            OcrMode::Mixed => SYSTEM_MIXED,
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "printed" => Ok(OcrMode::Printed),
            "handwriting" => Ok(OcrMode::Handwriting),
            "mixed" => Ok(OcrMode::Mixed),
            other => Err(anyhow!(
                "invalid mode '{}' (expected printed, handwriting or mixed)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrPrompt {
    pub system: String,
    pub user: String,
}

pub fn render_prompt(mode: OcrMode, file_name: &str) -> Result<OcrPrompt> {
    let mut context = TeraContext::new();
    context.insert("mode", mode.as_str());
    context.insert("mode_label", mode.label());
    let name = file_name.trim();
    context.insert("file_name", if name.is_empty() { "document" } else { name });

    let system = Tera::one_off(mode.system_template(), &context, false)
        .with_context(|| format!("failed to render {} system prompt", mode))?;
    let user = Tera::one_off(USER_PROMPT, &context, false)
        .with_context(|| "failed to render user prompt")?;
    Ok(OcrPrompt {
        system: system.trim().to_string(),
        user: user.trim().to_string(),
    })
}
