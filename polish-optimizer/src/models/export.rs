//! Export confirmation and artifact

use chrono::{DateTime, Utc};
use polish_common::api::sha256_hex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of an export request
///
/// `token` must equal the current terms token served by
/// `GET /api/optimization/terms`, proving which terms were shown.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfirmation {
    pub accepted: bool,
    pub token: Option<String>,
}

impl ExportConfirmation {
    pub fn confirms(&self, terms_token: &str) -> bool {
        self.accepted && self.token.as_deref().map(str::trim) == Some(terms_token)
    }
}

/// The exported document; computed once and then served unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub session_id: Uuid,
    pub title: Option<String>,
    pub document: String,
    pub segment_count: usize,
    pub confirmation_token: String,
    pub exported_at: DateTime<Utc>,
}

/// Academic-integrity terms shown before export
pub const EXPORT_TERMS: &str = "\
The optimized text is a language-editing aid. You remain the author of the \
work and are responsible for its content, its originality and its compliance \
with the academic integrity rules of your institution and of the venue you \
submit to. Do not present generated wording as independent research, and \
disclose the use of language tools wherever such disclosure is required.";

/// Terms text and the token an export request must echo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTerms {
    pub text: String,
    pub token: String,
}

impl ExportTerms {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let token = sha256_hex(&text);
        Self { text, token }
    }

    pub fn current() -> Self {
        Self::new(EXPORT_TERMS)
    }

    pub fn accepts(&self, confirmation: &ExportConfirmation) -> bool {
        confirmation.confirms(&self.token)
    }
}
