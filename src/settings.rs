use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const BYTES_PER_MB: usize = 1024 * 1024;
const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/heic",
    "application/pdf",
];

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_addr: String,
    pub require_api_key: bool,
    pub gateway_base_url: String,
    pub gateway_model: String,
    pub backend_url: Option<String>,
    pub publishable_key: Option<String>,
    pub storage_bucket: String,
    pub function_url: String,
    pub history_limit: usize,
    pub max_file_mb: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8787".to_string(),
            require_api_key: false,
            gateway_base_url: "https://api.openai.com/v1".to_string(),
            gateway_model: "gpt-4o-mini".to_string(),
            backend_url: None,
            publishable_key: None,
            storage_bucket: "documents".to_string(),
            function_url: "http://127.0.0.1:8787/ocr".to_string(),
            history_limit: 20,
            max_file_mb: 10,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|mime| mime.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    server: Option<ServerSettings>,
    gateway: Option<GatewaySettings>,
    backend: Option<BackendSettings>,
    client: Option<ClientSettings>,
    limits: Option<LimitSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
    require_api_key: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewaySettings {
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendSettings {
    url: Option<String>,
    publishable_key: Option<String>,
    storage_bucket: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSettings {
    function_url: Option<String>,
    histories: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitSettings {
    max_file_mb: Option<usize>,
    allowed_mime_types: Option<Vec<String>>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<embedded>"))?);
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?);
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content).with_context(|| format!("failed to parse settings: {}", path.display()))
}

impl Settings {
    pub fn max_file_bytes(&self) -> usize {
        self.max_file_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn is_allowed_mime(&self, mime: &str) -> bool {
        let mime = mime.trim();
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime))
    }

    pub fn backend_url(&self) -> Result<&str> {
        self.backend_url
            .as_deref()
            .ok_or_else(|| anyhow!("backend url is not configured (set [backend].url or OCR_BACKEND_URL)"))
    }

    pub fn publishable_key(&self) -> Result<&str> {
        self.publishable_key.as_deref().ok_or_else(|| {
            anyhow!(
                "publishable key is not configured (set [backend].publishable_key or OCR_PUBLISHABLE_KEY)"
            )
        })
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(server) = incoming.server {
            if let Some(addr) = non_empty(server.addr) {
                self.server_addr = addr;
            }
            if let Some(require) = server.require_api_key {
                self.require_api_key = require;
            }
        }
        if let Some(gateway) = incoming.gateway {
            if let Some(url) = non_empty(gateway.base_url) {
                self.gateway_base_url = url;
            }
            if let Some(model) = non_empty(gateway.model) {
                self.gateway_model = model;
            }
        }
        if let Some(backend) = incoming.backend {
            if let Some(url) = non_empty(backend.url) {
                self.backend_url = Some(url);
            }
            if let Some(key) = non_empty(backend.publishable_key) {
                self.publishable_key = Some(key);
            }
            if let Some(bucket) = non_empty(backend.storage_bucket) {
                self.storage_bucket = bucket;
            }
        }
        if let Some(client) = incoming.client {
            if let Some(url) = non_empty(client.function_url) {
                self.function_url = url;
            }
            if let Some(limit) = client.histories {
                if limit > 0 {
                    self.history_limit = limit;
                }
            }
        }
        if let Some(limits) = incoming.limits {
            if let Some(size) = limits.max_file_mb {
                if size > 0 {
                    self.max_file_mb = size;
                }
            }
            if let Some(types) = limits.allowed_mime_types {
                self.allowed_mime_types = types
                    .into_iter()
                    .map(|value| value.trim().to_lowercase())
                    .filter(|value| !value.is_empty())
                    .collect();
            }
        }
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        if let Some(url) = get("OCR_BACKEND_URL") {
            self.backend_url = Some(url);
        }
        if let Some(key) = get("OCR_PUBLISHABLE_KEY") {
            self.publishable_key = Some(key);
        }
        if let Some(url) = get("OCR_FUNCTION_URL") {
            self.function_url = url;
        }
        if let Some(url) = get("OCR_GATEWAY_BASE_URL") {
            self.gateway_base_url = url;
        }
        if let Some(model) = get("OCR_GATEWAY_MODEL") {
            self.gateway_model = model;
        }
        if let Some(addr) = get("OCR_SERVER_ADDR") {
            self.server_addr = addr;
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".llm-ocr-rust"))
        }
    })
}
