use serde::{Deserialize, Serialize};

/// Body of a call to the OCR function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OcrRequest {
    pub image_base64: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub mode: Option<String>,
    pub user_access_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
