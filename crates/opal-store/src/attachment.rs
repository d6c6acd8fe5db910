//! Attachment ledger.
//!
//! Attachments are named artifacts that ride alongside a session's messages.
//! Mutations are an append-only ledger of [`AttachmentOp`]s; the *current*
//! set is the fold of the ledger (last `add` per name wins, `remove` deletes
//! the name).  Folding the same ledger always yields the same set, which is
//! what lets replicas and late-joining listeners agree on session state.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// How an attachment entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Produced by a tool or the engine during a task.
    Artifact,
    /// Supplied by the user with a task.
    Upload,
    /// Pulled in from an earlier session or external memory.
    Recalled,
}

/// Display hints for rendering an attachment preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewProfile {
    /// Renderer hint, e.g. `"text"`, `"image"`, `"table"`.
    pub format: String,
    /// Maximum characters a preview should occupy.
    pub max_chars: usize,
}

/// A named artifact associated with a session.
///
/// Exactly one of `data` (inline base64) or `uri` is usually present; both
/// absent means reference-only.  Names are unique within a session and
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique (per session), case-sensitive name.
    pub name: String,

    /// MIME type, e.g. `text/plain`, `image/png`.
    pub media_type: String,

    /// Inline content, base64-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// External location of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// How the attachment entered the session.
    pub kind: AttachmentKind,

    /// Whether the attachment is surfaced to the user (`"visible"`) or kept
    /// internal (`"hidden"`).
    #[serde(default = "default_visibility")]
    pub visibility: String,

    /// Optional preview rendering hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewProfile>,
}

fn default_visibility() -> String {
    "visible".to_owned()
}

impl Attachment {
    /// Create a reference-only attachment.
    pub fn reference(name: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data: None,
            uri: None,
            description: String::new(),
            kind: AttachmentKind::Artifact,
            visibility: default_visibility(),
            preview: None,
        }
    }

    /// Builder: set inline base64 data.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Builder: set an external URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set the kind.
    pub fn with_kind(mut self, kind: AttachmentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Approximate decoded size of the inline data in bytes.
    pub fn inline_size(&self) -> usize {
        // base64 expands 3 bytes to 4 characters.
        self.data.as_ref().map_or(0, |d| d.len() / 4 * 3)
    }

    /// Rewrite the attachment as reference-only when its inline data exceeds
    /// `cap` bytes.  The URI (when present) survives; the description records
    /// the rewrite so consumers know content must be fetched.
    pub fn apply_inline_cap(mut self, cap: usize) -> Self {
        let size = self.inline_size();
        if size > cap {
            tracing::warn!(
                name = %self.name,
                size,
                cap,
                "inline attachment exceeds cap; rewriting as reference-only"
            );
            self.data = None;
            if self.description.is_empty() {
                self.description = format!("inline content ({size} bytes) elided, exceeds cap");
            } else {
                self.description
                    .push_str(&format!(" [inline content ({size} bytes) elided, exceeds cap]"));
            }
        }
        self
    }

    /// Stable content id for cache keys: a hash over name, data, and uri.
    pub fn content_id(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name.hash(&mut hasher);
        self.data.hash(&mut hasher);
        self.uri.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// One entry in the attachment mutation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum AttachmentOp {
    /// Insert or replace the attachment under its name.
    Add { attachment: Attachment },
    /// Delete the name from the current set.
    Remove { name: String },
}

impl AttachmentOp {
    /// The attachment name this op targets.
    pub fn name(&self) -> &str {
        match self {
            Self::Add { attachment } => &attachment.name,
            Self::Remove { name } => name,
        }
    }
}

/// Fold a ledger into the current attachment set.
///
/// The result is deterministic for a given ledger order; a `BTreeMap` keeps
/// listing order stable for rendering and tests.
pub fn fold_ledger<I>(ops: I) -> BTreeMap<String, Attachment>
where
    I: IntoIterator<Item = AttachmentOp>,
{
    let mut current = BTreeMap::new();
    for op in ops {
        match op {
            AttachmentOp::Add { attachment } => {
                current.insert(attachment.name.clone(), attachment);
            }
            AttachmentOp::Remove { name } => {
                current.remove(&name);
            }
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn att(name: &str) -> Attachment {
        Attachment::reference(name, "text/plain")
    }

    #[test]
    fn fold_applies_add_remove_add() {
        let ops = vec![
            AttachmentOp::Add { attachment: att("a") },
            AttachmentOp::Remove { name: "a".into() },
            AttachmentOp::Add { attachment: att("a").with_description("second") },
            AttachmentOp::Add { attachment: att("b") },
        ];

        let set = fold_ledger(ops);
        assert_eq!(set.len(), 2);
        assert_eq!(set["a"].description, "second");
    }

    #[test]
    fn fold_is_case_sensitive() {
        let ops = vec![
            AttachmentOp::Add { attachment: att("Report") },
            AttachmentOp::Remove { name: "report".into() },
        ];
        let set = fold_ledger(ops);
        assert!(set.contains_key("Report"));
    }

    #[test]
    fn oversized_inline_data_is_rewritten() {
        let big = "A".repeat(2048);
        let rewritten = att("big")
            .with_data(big)
            .with_uri("https://example.com/big")
            .apply_inline_cap(1024);

        assert!(rewritten.data.is_none());
        assert_eq!(rewritten.uri.as_deref(), Some("https://example.com/big"));
        assert!(rewritten.description.contains("elided"));
    }

    #[test]
    fn small_inline_data_survives_cap() {
        let kept = att("small").with_data("aGVsbG8=").apply_inline_cap(1024);
        assert!(kept.data.is_some());
    }

    #[test]
    fn content_id_tracks_content() {
        let a = att("x").with_data("aGVsbG8=");
        let b = att("x").with_data("d29ybGQ=");
        assert_ne!(a.content_id(), b.content_id());
        assert_eq!(a.content_id(), a.clone().content_id());
    }
}
