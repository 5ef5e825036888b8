use std::io::{self, IsTerminal, Read};

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "llm-ocr-rust",
    version,
    about = "Extract text from scanned documents and images with an LLM"
)]
struct Cli {
    /// Run the OCR function as an HTTP server
    #[arg(long = "server")]
    server: bool,

    /// File to extract text from (image/* or pdf). Reads stdin when omitted.
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Mime type for --data (auto, image/*, pdf, png, jpg, gif, webp, bmp, tiff, heic)
    #[arg(short = 'M', long = "data-mime")]
    data_mime: Option<String>,

    /// OCR mode: printed, handwriting or mixed (default: inferred from the file name)
    #[arg(short = 'm', long = "mode")]
    mode: Option<String>,

    /// Show recent documents and exit
    #[arg(long = "show-histories")]
    show_histories: bool,

    /// Print the stored OCR text of a document and exit
    #[arg(long = "show-result", value_name = "DOCUMENT_ID")]
    show_result: Option<String>,

    /// Delete a document with its result and stored file
    #[arg(long = "delete-document", value_name = "DOCUMENT_ID")]
    delete_document: Option<String>,

    /// AI gateway API key for --server (overrides OCR_GATEWAY_API_KEY)
    #[arg(short = 'k', long = "gateway-key")]
    gateway_key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    llm_ocr_rust::logging::init(cli.verbose || cli.server)?;

    let needs_input = !(cli.server
        || cli.show_histories
        || cli.show_result.is_some()
        || cli.delete_document.is_some());
    let mut data_attachment = None;
    if needs_input && cli.data.is_none() && !io::stdin().is_terminal() {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        data_attachment = Some(llm_ocr_rust::data::load_attachment_from_bytes(
            buffer,
            cli.data_mime.as_deref(),
            None,
        )?);
    }

    let config = llm_ocr_rust::Config {
        data: cli.data,
        data_mime: cli.data_mime,
        data_attachment,
        mode: cli.mode,
        settings_path: cli.read_settings,
        show_histories: cli.show_histories,
        show_result: cli.show_result,
        delete_document: cli.delete_document,
        gateway_key: cli.gateway_key,
    };

    if cli.server {
        return llm_ocr_rust::serve(config).await;
    }

    let output = llm_ocr_rust::run(config).await?;
    println!("{}", output);
    Ok(())
}
