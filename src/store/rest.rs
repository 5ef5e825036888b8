use anyhow::{Context, Result, anyhow};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Document, DocumentStatus, DocumentStore, HistoryItem, NewDocument, OcrResultRecord,
    StoreFuture, object_path,
};
use crate::auth::Session;
use crate::data::DataAttachment;
use crate::normalize::OcrResult;
use crate::settings::Settings;

const DOCUMENTS_TABLE: &str = "documents";
const RESULTS_TABLE: &str = "ocr_results";

/// Store backed by the platform's REST table API and object storage. Requests
/// carry the user's token so row-level policies apply.
#[derive(Debug, Clone)]
pub struct RestStore {
    base_url: String,
    api_key: String,
    bucket: String,
    http: reqwest::Client,
}

impl RestStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: bucket.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            settings.backend_url()?,
            settings.publishable_key()?,
            settings.storage_bucket.clone(),
        ))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn object_url(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/storage/v1/object", self.base_url))
            .with_context(|| "invalid backend url")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("backend url cannot be a base"))?
            .push(&self.bucket)
            .extend(path.split('/'));
        Ok(url)
    }

    fn authed(&self, builder: RequestBuilder, session: &Session) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        session: &Session,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .authed(self.http.get(self.table_url(table)), session)
            .query(query)
            .send()
            .await
            .with_context(|| format!("failed to query {}", table))?;
        let body = expect_success(response, table).await?;
        serde_json::from_str(&body).with_context(|| format!("failed to parse {} rows", table))
    }

    async fn insert_row<T: DeserializeOwned>(
        &self,
        session: &Session,
        table: &str,
        row: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .authed(self.http.post(self.table_url(table)), session)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .with_context(|| format!("failed to insert into {}", table))?;
        let body = expect_success(response, table).await?;
        let rows: Vec<T> = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse inserted {} row", table))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow!("insert into {} returned no row", table))
    }

    async fn update_status(
        &self,
        session: &Session,
        document_id: Uuid,
        status: DocumentStatus,
    ) -> Result<()> {
        let response = self
            .authed(self.http.patch(self.table_url(DOCUMENTS_TABLE)), session)
            .query(&[("id", eq(document_id))])
            .json(&json!({ "status": status }))
            .send()
            .await
            .with_context(|| "failed to update document status")?;
        expect_success(response, DOCUMENTS_TABLE).await?;
        debug!(%document_id, %status, "document status updated");
        Ok(())
    }

    async fn delete_rows(&self, session: &Session, table: &str, column: &str, id: Uuid) -> Result<()> {
        let response = self
            .authed(self.http.delete(self.table_url(table)), session)
            .query(&[(column, eq(id))])
            .send()
            .await
            .with_context(|| format!("failed to delete from {}", table))?;
        expect_success(response, table).await?;
        Ok(())
    }

    async fn remove_object(&self, session: &Session, path: &str) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .authed(self.http.delete(url), session)
            .json(&json!({ "prefixes": [path] }))
            .send()
            .await
            .with_context(|| "failed to remove stored file")?;
        expect_success(response, "storage").await?;
        Ok(())
    }

    async fn create(&self, session: &Session, document: NewDocument) -> Result<Document> {
        let row = json!({
            "user_id": session.user_id,
            "file_name": document.file_name,
            "file_type": document.file_type,
            "file_size": document.file_size,
            "status": DocumentStatus::Processing,
        });
        let document: Document = self.insert_row(session, DOCUMENTS_TABLE, row).await?;
        debug!(document_id = %document.id, "document row created");
        Ok(document)
    }

    async fn upload(
        &self,
        session: &Session,
        document: &Document,
        data: &DataAttachment,
    ) -> Result<String> {
        let path = object_path(document);
        let response = self
            .authed(self.http.post(self.object_url(&path)?), session)
            .header("content-type", &data.mime)
            .header("x-upsert", "true")
            .body(data.bytes.clone())
            .send()
            .await
            .with_context(|| "failed to upload file")?;
        expect_success(response, "storage").await?;
        Ok(path)
    }

    async fn save(
        &self,
        session: &Session,
        document_id: Uuid,
        result: &OcrResult,
    ) -> Result<OcrResultRecord> {
        let row = json!({
            "document_id": document_id,
            "user_id": session.user_id,
            "extracted_text": result.extracted_text,
            "word_count": result.word_count,
            "character_count": result.character_count,
            "processing_time_ms": result.processing_time_ms,
        });
        let record = self.insert_row(session, RESULTS_TABLE, row).await?;
        if let Err(err) = self
            .update_status(session, document_id, DocumentStatus::Completed)
            .await
        {
            // A failed document must not keep a result row.
            if let Err(cleanup) = self
                .delete_rows(session, RESULTS_TABLE, "document_id", document_id)
                .await
            {
                warn!(%document_id, error = %cleanup, "failed to remove orphaned result");
            }
            return Err(err);
        }
        Ok(record)
    }

    async fn history(&self, session: &Session, limit: usize) -> Result<Vec<HistoryItem>> {
        let rows: Vec<HistoryRow> = self
            .fetch_rows(
                session,
                DOCUMENTS_TABLE,
                &[
                    ("select", "*,ocr_results(*)".to_string()),
                    ("user_id", format!("eq.{}", session.user_id)),
                    ("order", "created_at.desc".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(HistoryRow::into_item).collect())
    }

    async fn result(&self, session: &Session, document_id: Uuid) -> Result<Option<OcrResultRecord>> {
        let rows: Vec<OcrResultRecord> = self
            .fetch_rows(
                session,
                RESULTS_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("document_id", eq(document_id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, session: &Session, document_id: Uuid) -> Result<bool> {
        let rows: Vec<Document> = self
            .fetch_rows(
                session,
                DOCUMENTS_TABLE,
                &[("select", "*".to_string()), ("id", eq(document_id))],
            )
            .await?;
        let Some(document) = rows.into_iter().next() else {
            return Ok(false);
        };
        if let Err(err) = self.remove_object(session, &object_path(&document)).await {
            warn!(%document_id, error = %err, "failed to remove stored file");
        }
        self.delete_rows(session, RESULTS_TABLE, "document_id", document_id)
            .await?;
        self.delete_rows(session, DOCUMENTS_TABLE, "id", document_id)
            .await?;
        debug!(%document_id, "document deleted");
        Ok(true)
    }
}

impl DocumentStore for RestStore {
    fn create_document<'a>(
        &'a self,
        session: &'a Session,
        document: NewDocument,
    ) -> StoreFuture<'a, Document> {
        Box::pin(self.create(session, document))
    }

    fn upload_file<'a>(
        &'a self,
        session: &'a Session,
        document: &'a Document,
        data: &'a DataAttachment,
    ) -> StoreFuture<'a, String> {
        Box::pin(self.upload(session, document, data))
    }

    fn save_result<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
        result: &'a OcrResult,
    ) -> StoreFuture<'a, OcrResultRecord> {
        Box::pin(self.save(session, document_id, result))
    }

    fn mark_failed<'a>(&'a self, session: &'a Session, document_id: Uuid) -> StoreFuture<'a, ()> {
        Box::pin(self.update_status(session, document_id, DocumentStatus::Failed))
    }

    fn list_history<'a>(
        &'a self,
        session: &'a Session,
        limit: usize,
    ) -> StoreFuture<'a, Vec<HistoryItem>> {
        Box::pin(self.history(session, limit))
    }

    fn get_result<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
    ) -> StoreFuture<'a, Option<OcrResultRecord>> {
        Box::pin(self.result(session, document_id))
    }

    fn delete_document<'a>(
        &'a self,
        session: &'a Session,
        document_id: Uuid,
    ) -> StoreFuture<'a, bool> {
        Box::pin(self.delete(session, document_id))
    }
}

fn eq(id: Uuid) -> String {
    format!("eq.{}", id)
}

async fn expect_success(response: Response, what: &str) -> Result<String> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        return Ok(body);
    }
    Err(anyhow!("{} request failed ({}): {}", what, status, body))
}

/// A document row with its embedded result. The embed is an object for a
/// one-to-one relation and an array otherwise.
#[derive(Debug, Deserialize)]
struct HistoryRow {
    #[serde(flatten)]
    document: Document,
    #[serde(default)]
    ocr_results: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Embedded {
    One(OcrResultRecord),
    Many(Vec<OcrResultRecord>),
}

impl HistoryRow {
    fn into_item(self) -> HistoryItem {
        let result = match self.ocr_results {
            Some(Embedded::One(record)) => Some(record),
            Some(Embedded::Many(records)) => records.into_iter().next(),
            None => None,
        };
        HistoryItem {
            document: self.document,
            result,
        }
    }
}
