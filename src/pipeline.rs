use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Session;
use crate::client::OcrClient;
use crate::data::DataAttachment;
use crate::prompts::OcrMode;
use crate::store::{Document, DocumentStatus, DocumentStore, NewDocument, OcrResultRecord};

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub document: Document,
    pub result: OcrResultRecord,
}

/// Records the document, stores the original file, runs OCR and saves the
/// result. The document ends `completed` on success and `failed` otherwise.
pub async fn process_file<S: DocumentStore + ?Sized>(
    client: &OcrClient,
    store: &S,
    session: &Session,
    data: &DataAttachment,
    mode: Option<OcrMode>,
) -> Result<ProcessedDocument> {
    let mut document = store
        .create_document(session, NewDocument::from_attachment(data))
        .await
        .with_context(|| "failed to create document record")?;
    info!(document_id = %document.id, file = %document.file_name, "document created");

    let outcome = async {
        store
            .upload_file(session, &document, data)
            .await
            .with_context(|| "failed to upload file")?;
        let result = client.extract(data, mode, session).await?;
        store
            .save_result(session, document.id, &result)
            .await
            .with_context(|| "failed to save OCR result")
    }
    .await;

    match outcome {
        Ok(result) => {
            document.status = DocumentStatus::Completed;
            info!(
                document_id = %document.id,
                words = result.word_count,
                "document completed"
            );
            Ok(ProcessedDocument { document, result })
        }
        Err(err) => {
            if let Err(mark_err) = store.mark_failed(session, document.id).await {
                warn!(document_id = %document.id, error = %mark_err, "failed to mark document failed");
            }
            warn!(document_id = %document.id, error = %err, "document failed");
            Err(err)
        }
    }
}

pub async fn delete_document<S: DocumentStore + ?Sized>(
    store: &S,
    session: &Session,
    document_id: Uuid,
) -> Result<bool> {
    let deleted = store.delete_document(session, document_id).await?;
    if deleted {
        info!(%document_id, "document deleted");
    }
    Ok(deleted)
}
