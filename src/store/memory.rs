use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    Document, DocumentStatus, DocumentStore, HistoryItem, NewDocument, OcrResultRecord,
    StoreFuture, object_path,
};
use crate::auth::Session;
use crate::data::DataAttachment;
use crate::normalize::OcrResult;

/// Process-local store. Every query is filtered by the session user, matching
/// the ownership rules of the hosted tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Debug, Default)]
struct Tables {
    documents: Vec<Document>,
    results: Vec<OcrResultRecord>,
    objects: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.tables().map(|tables| tables.objects.len()).unwrap_or(0)
    }

    pub fn result_count(&self) -> usize {
        self.tables().map(|tables| tables.results.len()).unwrap_or(0)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn create_document_now(&self, session: &Session, document: NewDocument) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4(),
            user_id: session.user_id.clone(),
            file_name: document.file_name,
            file_type: document.file_type,
            file_size: document.file_size,
            status: DocumentStatus::Processing,
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables()?.documents.push(document.clone());
        Ok(document)
    }

    fn set_status(&self, session: &Session, document_id: Uuid, status: DocumentStatus) -> Result<()> {
        let mut tables = self.tables()?;
        let document = owned_document_mut(&mut tables, session, document_id)?;
        document.status = status;
        Ok(())
    }

    fn save_result_now(
        &self,
        session: &Session,
        document_id: Uuid,
        result: &OcrResult,
    ) -> Result<OcrResultRecord> {
        let mut tables = self.tables()?;
        owned_document_mut(&mut tables, session, document_id)?;
        if tables
            .results
            .iter()
            .any(|record| record.document_id == document_id)
        {
            return Err(anyhow!("document {} already has a result", document_id));
        }
        owned_document_mut(&mut tables, session, document_id)?.status = DocumentStatus::Completed;
        let record = OcrResultRecord {
            id: Uuid::new_v4(),
            document_id,
            user_id: session.user_id.clone(),
            extracted_text: result.extracted_text.clone(),
            word_count: result.word_count,
            character_count: result.character_count,
            processing_time_ms: result.processing_time_ms,
        };
        tables.results.push(record.clone());
        Ok(record)
    }

    fn history_now(&self, session: &Session, limit: usize) -> Result<Vec<HistoryItem>> {
        let tables = self.tables()?;
        let mut documents = tables
            .documents
            .iter()
            .rev()
            .filter(|document| document.user_id == session.user_id)
            .cloned()
            .collect::<Vec<_>>();
        documents.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        documents.truncate(limit);
        Ok(documents
            .into_iter()
            .map(|document| {
                let result = tables
                    .results
                    .iter()
                    .find(|record| record.document_id == document.id)
                    .cloned();
                HistoryItem { document, result }
            })
            .collect())
    }

    fn result_now(&self, session: &Session, document_id: Uuid) -> Result<Option<OcrResultRecord>> {
        let tables = self.tables()?;
        Ok(tables
            .results
            .iter()
            .find(|record| record.document_id == document_id && record.user_id == session.user_id)
            .cloned())
    }

    fn delete_now(&self, session: &Session, document_id: Uuid) -> Result<bool> {
        let mut tables = self.tables()?;
        let Some(index) = tables
            .documents
            .iter()
            .position(|document| document.id == document_id && document.user_id == session.user_id)
        else {
            return Ok(false);
        };
        let document = tables.documents.remove(index);
        tables.objects.remove(&object_path(&document));
        tables
            .results
            .retain(|record| record.document_id != document_id);
        Ok(true)
    }
}

fn owned_document_mut<'a>(
    tables: &'a mut Tables,
    session: &Session,
    document_id: Uuid,
) -> Result<&'a mut Document> {
    tables
        .documents
        .iter_mut()
        .find(|document| document.id == document_id && document.user_id == session.user_id)
        .ok_or_else(|| anyhow!("document {} not found", document_id))
}

impl DocumentStore for MemoryStore {
    fn create_document<'a>(
        &'a self,
        session: &'a Session,
        document: NewDocument,
    ) -> StoreFuture<'a, Document> {
        Box::pin(async move { self.create_document_now(session, document) })
    }

    fn upload_file<'a>(
        &'a self,
        session: &'a Session,
        document: &'a Document,
        data: &'a DataAttachment,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            if document.user_id != session.user_id {
                return Err(anyhow!("object path is not owned by the session user"));
            }
            let path = object_path(document);
            self.tables()?
                .objects
                .insert(path.clone(), data.bytes.clone());
            Ok(path)
        })
    }

    fn save_result<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
        result: &'a OcrResult,
    ) -> StoreFuture<'a, OcrResultRecord> {
        Box::pin(async move { self.save_result_now(session, document_id, result) })
    }

    fn mark_failed<'a>(&'a self, session: &'a Session, document_id: Uuid) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.set_status(session, document_id, DocumentStatus::Failed) })
    }

    fn list_history<'a>(
        &'a self,
        session: &'a Session,
        limit: usize,
    ) -> StoreFuture<'a, Vec<HistoryItem>> {
        Box::pin(async move { self.history_now(session, limit) })
    }

    fn get_result<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
    ) -> StoreFuture<'a, Option<OcrResultRecord>> {
        Box::pin(async move { self.result_now(session, document_id) })
    }

    fn delete_document<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move { self.delete_now(session, document_id) })
    }
}
