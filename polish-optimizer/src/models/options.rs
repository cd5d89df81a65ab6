//! Start options for an optimization session

use serde::{Deserialize, Serialize};

/// What the provider is asked to do with each segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    /// Grammar, wording and academic register
    #[default]
    Polish,
    /// Restructure sentences while preserving meaning and citations
    Enhance,
}

impl OptimizationMode {
    /// System instruction sent with every segment
    pub fn instruction(&self) -> &'static str {
        match self {
            OptimizationMode::Polish => {
                "You are an academic language editor. Polish the following passage of a \
                 research paper: fix grammar, improve clarity and use a formal academic \
                 register. Keep the meaning, terminology, citations, numbers and formatting \
                 unchanged. Reply with the revised passage only."
            }
            OptimizationMode::Enhance => {
                "You are an academic writing assistant. Rewrite the following passage of a \
                 research paper with improved sentence structure and flow while strictly \
                 preserving its meaning, claims, citations, numbers and terminology. Reply \
                 with the rewritten passage only."
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationOptions {
    pub mode: OptimizationMode,
    /// Pin the session to one configured provider
    pub model: Option<String>,
    /// Extra instruction appended to the mode instruction
    pub instruction: Option<String>,
    /// Segment size in characters
    pub max_segment_chars: Option<usize>,
}

impl OptimizationOptions {
    /// Full system prompt for this session
    pub fn system_prompt(&self) -> String {
        match self.instruction.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => {
                format!("{}\n\nAdditional instruction: {}", self.mode.instruction(), extra)
            }
            _ => self.mode.instruction().to_string(),
        }
    }
}
