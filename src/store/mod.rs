use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::Session;
use crate::data::DataAttachment;
use crate::normalize::OcrResult;

mod memory;
mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub status: DocumentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

impl NewDocument {
    pub fn from_attachment(data: &DataAttachment) -> Self {
        Self {
            file_name: data.display_name().to_string(),
            file_type: data.mime.clone(),
            file_size: data.bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrResultRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: String,
    pub extracted_text: String,
    pub word_count: u64,
    pub character_count: u64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub document: Document,
    pub result: Option<OcrResultRecord>,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence for documents and their OCR results. Every call is scoped to the
/// session's user; rows owned by other users are invisible.
pub trait DocumentStore: Send + Sync {
    fn create_document<'a>(
        &'a self,
        session: &'a Session,
        document: NewDocument,
    ) -> StoreFuture<'a, Document>;

    /// Stores the original file and returns its object path.
    fn upload_file<'a>(
        &'a self,
        session: &'a Session,
        document: &'a Document,
        data: &'a DataAttachment,
    ) -> StoreFuture<'a, String>;

    /// Inserts the result row and marks the document completed.
    fn save_result<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
        result: &'a OcrResult,
    ) -> StoreFuture<'a, OcrResultRecord>;

    fn mark_failed<'a>(&'a self, session: &'a Session, document_id: Uuid) -> StoreFuture<'a, ()>;

    /// Newest first, each document with its result when one exists.
    fn list_history<'a>(
        &'a self,
        session: &'a Session,
        limit: usize,
    ) -> StoreFuture<'a, Vec<HistoryItem>>;

    fn get_result<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
    ) -> StoreFuture<'a, Option<OcrResultRecord>>;

    /// Removes the document, its result and its stored file. Returns `false`
    /// when no such document is visible to the session.
    fn delete_document<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
    ) -> StoreFuture<'a, bool>;
}

/// Object path of a document's original file: `<user>/<document>/<file name>`.
pub fn object_path(document: &Document) -> String {
    let file_name = document
        .file_name
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
        .collect::<String>();
    format!("{}/{}/{}", document.user_id, document.id, file_name)
}
