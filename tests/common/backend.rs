use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::spawn;

const OBJECT_PREFIX: &str = "/storage/v1/object/documents/";

/// One request as seen by the fake table and storage API.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub apikey: Option<String>,
    pub bearer: Option<String>,
    pub prefer: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn route(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Default)]
struct Tables {
    documents: Vec<Value>,
    results: Vec<Value>,
    objects: HashMap<String, Vec<u8>>,
    requests: Vec<RecordedRequest>,
    failing_status_updates: usize,
}

/// In-process stand-in for the PostgREST tables and the storage bucket.
#[derive(Clone, Default)]
pub struct FakeBackend {
    tables: Arc<Mutex<Tables>>,
}

impl FakeBackend {
    pub async fn start() -> (Self, String) {
        let backend = Self::default();
        let router = Router::new().fallback(handle).with_state(backend.clone());
        let url = spawn(router).await;
        (backend, url)
    }

    pub fn fail_status_updates(&self, count: usize) {
        self.tables.lock().unwrap().failing_status_updates = count;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.tables.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.tables.lock().unwrap().requests.clear();
    }

    pub fn document_rows(&self) -> Vec<Value> {
        self.tables.lock().unwrap().documents.clone()
    }

    pub fn result_rows(&self) -> Vec<Value> {
        self.tables.lock().unwrap().results.clone()
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.tables.lock().unwrap().objects.keys().cloned().collect()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn matches(row: &Value, column: &str, filter: Option<&String>) -> bool {
    match filter.and_then(|value| value.strip_prefix("eq.")) {
        Some(expected) => row[column].as_str() == Some(expected),
        None => true,
    }
}

async fn handle(
    State(backend): State<FakeBackend>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let mut tables = backend.tables.lock().unwrap();
    let content_type = header(&headers, "content-type");
    let json_body = if content_type.as_deref() == Some("application/json") {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    tables.requests.push(RecordedRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: query.clone(),
        apikey: header(&headers, "apikey"),
        bearer: header(&headers, "authorization")
            .and_then(|value| value.strip_prefix("Bearer ").map(str::to_string)),
        prefer: header(&headers, "prefer"),
        content_type,
        body: json_body.clone(),
    });

    let path = uri.path();
    match (method.as_str(), path) {
        ("POST", "/rest/v1/documents") => {
            let mut row = json_body;
            row["id"] = json!(Uuid::new_v4());
            row["created_at"] = json!(OffsetDateTime::now_utc().format(&Rfc3339).unwrap());
            tables.documents.push(row.clone());
            (StatusCode::CREATED, Json(json!([row])))
        }
        ("POST", "/rest/v1/ocr_results") => {
            let document_id = json_body["document_id"].clone();
            if tables
                .results
                .iter()
                .any(|row| row["document_id"] == document_id)
            {
                return (
                    StatusCode::CONFLICT,
                    Json(json!({"message": "duplicate key value violates unique constraint"})),
                );
            }
            let mut row = json_body;
            row["id"] = json!(Uuid::new_v4());
            tables.results.push(row.clone());
            (StatusCode::CREATED, Json(json!([row])))
        }
        ("PATCH", "/rest/v1/documents") => {
            if tables.failing_status_updates > 0 {
                tables.failing_status_updates -= 1;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"message": "database unavailable"})),
                );
            }
            let filter = query.get("id");
            for row in tables
                .documents
                .iter_mut()
                .filter(|row| matches(row, "id", filter))
            {
                row["status"] = json_body["status"].clone();
            }
            (StatusCode::OK, Json(json!([])))
        }
        ("GET", "/rest/v1/documents") => {
            let mut rows = tables
                .documents
                .iter()
                .filter(|row| matches(row, "id", query.get("id")))
                .filter(|row| matches(row, "user_id", query.get("user_id")))
                .cloned()
                .collect::<Vec<_>>();
            if query.get("select").is_some_and(|select| select.contains("ocr_results")) {
                for row in &mut rows {
                    let embedded = tables
                        .results
                        .iter()
                        .filter(|result| result["document_id"] == row["id"])
                        .cloned()
                        .collect::<Vec<_>>();
                    row["ocr_results"] = json!(embedded);
                }
            }
            if query.get("order").map(String::as_str) == Some("created_at.desc") {
                rows.reverse();
            }
            if let Some(limit) = query.get("limit").and_then(|value| value.parse().ok()) {
                rows.truncate(limit);
            }
            (StatusCode::OK, Json(json!(rows)))
        }
        ("GET", "/rest/v1/ocr_results") => {
            let rows = tables
                .results
                .iter()
                .filter(|row| matches(row, "document_id", query.get("document_id")))
                .cloned()
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(json!(rows)))
        }
        ("DELETE", "/rest/v1/ocr_results") => {
            let filter = query.get("document_id").cloned();
            tables
                .results
                .retain(|row| !matches(row, "document_id", filter.as_ref()));
            (StatusCode::OK, Json(json!([])))
        }
        ("DELETE", "/rest/v1/documents") => {
            let filter = query.get("id").cloned();
            tables
                .documents
                .retain(|row| !matches(row, "id", filter.as_ref()));
            (StatusCode::OK, Json(json!([])))
        }
        ("POST", object) if object.starts_with(OBJECT_PREFIX) => {
            let key = object[OBJECT_PREFIX.len()..].to_string();
            tables.objects.insert(key.clone(), body.to_vec());
            (StatusCode::OK, Json(json!({"Key": key})))
        }
        ("DELETE", "/storage/v1/object/documents") => {
            let prefixes = json_body["prefixes"].as_array().cloned().unwrap_or_default();
            for prefix in prefixes.iter().filter_map(Value::as_str) {
                tables.objects.remove(prefix);
            }
            (StatusCode::OK, Json(json!([])))
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": format!("no route for {} {}", method, path)})),
        ),
    }
}
