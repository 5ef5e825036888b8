use anyhow::{Context, Result, anyhow};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub mod auth;
pub mod client;
pub mod data;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod server;
pub mod settings;
pub mod store;
#[cfg(test)]
mod test_util;

pub use client::{ClientError, OcrClient};
pub use normalize::OcrResult;
pub use prompts::OcrMode;
pub use providers::{Gateway, Provider, ProviderError};
pub use store::{DocumentStore, MemoryStore, RestStore};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub data: Option<String>,
    pub data_mime: Option<String>,
    pub data_attachment: Option<data::DataAttachment>,
    pub mode: Option<String>,
    pub settings_path: Option<String>,
    pub show_histories: bool,
    pub show_result: Option<String>,
    pub delete_document: Option<String>,
    pub gateway_key: Option<String>,
}

/// Runs the OCR function until the listener fails.
pub async fn serve(config: Config) -> Result<()> {
    let settings = settings::load_settings(config.settings_path.as_deref().map(Path::new))?;
    let key = providers::resolve_gateway_key(config.gateway_key.as_deref())
        .with_context(|| "no gateway API key found (set OCR_GATEWAY_API_KEY or --gateway-key)")?;
    let auth = auth::BackendAuth::from_settings(&settings)?;
    let gateway = Gateway::new(key)
        .with_model(settings.gateway_model.clone())
        .with_base_url(settings.gateway_base_url.clone());
    let addr = settings.server_addr.clone();
    server::run_server(server::ServerState::new(settings, auth, gateway), addr).await
}

pub async fn run(config: Config) -> Result<String> {
    let settings = settings::load_settings(config.settings_path.as_deref().map(Path::new))?;
    let auth = auth::BackendAuth::from_settings(&settings)?;
    let session = auth::resolve_session(&auth).await?;
    let store = RestStore::from_settings(&settings)?;

    if config.show_histories {
        let history = store.list_history(&session, settings.history_limit).await?;
        return Ok(format_history(&history));
    }
    if let Some(id) = config.show_result.as_deref() {
        let document_id = parse_document_id(id)?;
        let record = store
            .get_result(&session, document_id)
            .await?
            .ok_or_else(|| anyhow!("no OCR result for document {}", document_id))?;
        return Ok(record.extracted_text);
    }
    if let Some(id) = config.delete_document.as_deref() {
        let document_id = parse_document_id(id)?;
        if !pipeline::delete_document(&store, &session, document_id).await? {
            return Err(anyhow!("document {} not found", document_id));
        }
        return Ok(format!("deleted {}", document_id));
    }

    let mode = config
        .mode
        .as_deref()
        .map(str::parse::<OcrMode>)
        .transpose()?;
    let attachment = match (config.data_attachment, config.data.as_deref()) {
        (Some(attachment), _) => attachment,
        (None, Some(path)) => data::load_attachment(Path::new(path), config.data_mime.as_deref())?,
        (None, None) => return Err(anyhow!("no input file (use --data or pipe a file on stdin)")),
    };
    let client = OcrClient::new(settings.function_url.clone(), settings.publishable_key()?);
    let processed = pipeline::process_file(&client, &store, &session, &attachment, mode).await?;
    Ok(format_processed(&processed))
}

fn parse_document_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).with_context(|| format!("invalid document id '{}'", value))
}

fn format_processed(processed: &pipeline::ProcessedDocument) -> String {
    let result = &processed.result;
    format!(
        "{}\n---\ndocument: {}\nwords: {}, characters: {}, time: {}ms",
        result.extracted_text,
        processed.document.id,
        result.word_count,
        result.character_count,
        result.processing_time_ms
    )
}

fn format_history(history: &[store::HistoryItem]) -> String {
    if history.is_empty() {
        return "no documents".to_string();
    }
    history
        .iter()
        .map(|item| {
            let document = &item.document;
            let created = document
                .created_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| document.created_at.to_string());
            let words = item
                .result
                .as_ref()
                .map(|record| format!("{} words", record.word_count))
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}\t{}\t{}\t{}\t{}",
                document.id, created, document.status, document.file_name, words
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
