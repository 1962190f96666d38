//! In-process stand-in for the Hodela API.
//!
//! Speaks the same wire format as the real service: credentials travel in
//! the query string or the body, bodies are urlencoded or multipart, and
//! batches are posted to `/` as a JSON `batch` parameter. Replies use the
//! API's shapes, including bare ids, bare booleans and error payloads.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

pub const APP_ID: &str = "4242";
pub const APP_SECRET: &str = "mock-secret";
pub const BATCH_LIMIT: usize = 50;

const BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

#[derive(Debug)]
struct Record {
    user: User,
    version: u64,
}

#[derive(Debug, Default)]
pub struct Store {
    users: BTreeMap<u64, Record>,
    last_user_id: u64,
    last_photo_id: u64,
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// A request reduced to what the API looks at.
#[derive(Debug, Default)]
pub struct Incoming {
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
}

impl Incoming {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    fn raw(status: StatusCode, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    fn json(status: StatusCode, value: &Value) -> Self {
        Self::raw(status, "application/json", value.to_string())
    }

    /// The API repeats the `error` key: a flag, then the details.
    fn error(status: StatusCode, code: i64, message: &str, error_type: &str) -> Self {
        let details = json!({ "code": code, "message": message, "type": error_type });
        Self::raw(status, "application/json", format!("{{\"error\":1,\"error\":{details}}}"))
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// One element of a batch reply.
    fn to_batch_json(&self, include_headers: bool) -> Value {
        let mut reply = json!({ "code": self.status.as_u16(), "body": self.body });
        if include_headers {
            reply["headers"] = self
                .headers
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect();
        }
        reply
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) =
                (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
            {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// One child of a posted batch.
#[derive(Debug, Deserialize)]
struct BatchItem {
    method: String,
    relative_url: String,
    #[serde(default)]
    headers: Vec<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    attached_files: Option<String>,
}

impl BatchItem {
    fn to_incoming(&self, files: &[UploadedFile]) -> Result<Incoming, Reply> {
        let (path, query) = self
            .relative_url
            .split_once('?')
            .unwrap_or((self.relative_url.as_str(), ""));
        let mut params = parse_form(query.as_bytes());
        if let Some(body) = &self.body {
            params.extend(parse_form(body.as_bytes()));
        }
        let headers = self
            .headers
            .iter()
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();

        let mut attached = Vec::new();
        for key in self.attached_files.iter().flat_map(|keys| keys.split(',')) {
            let key = key.trim();
            let file = files.iter().find(|file| file.field == key).ok_or_else(|| {
                Reply::error(
                    StatusCode::BAD_REQUEST,
                    100,
                    &format!("File {key} has not been attached"),
                    "GraphBatchException",
                )
            })?;
            attached.push(file.clone());
        }

        Ok(Incoming {
            method: self.method.to_ascii_uppercase(),
            path: format!("/{}", path.trim_start_matches('/')),
            params,
            headers,
            files: attached,
        })
    }
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/", post(batch))
        .fallback(single)
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn single(State(db): State<Db>, request: Request) -> Reply {
    let incoming = match read_request(request).await {
        Ok(incoming) => incoming,
        Err(reply) => return reply,
    };
    let mut store = db.write().await;
    dispatch(&mut store, &incoming)
}

async fn batch(State(db): State<Db>, request: Request) -> Reply {
    let incoming = match read_request(request).await {
        Ok(incoming) => incoming,
        Err(reply) => return reply,
    };
    if let Err(reply) = authenticate(&incoming) {
        return reply;
    }
    let Some(raw) = incoming.param("batch") else {
        return Reply::error(
            StatusCode::BAD_REQUEST,
            100,
            "The parameter batch is required",
            "GraphBatchException",
        );
    };
    let items: Vec<BatchItem> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            return Reply::error(
                StatusCode::BAD_REQUEST,
                100,
                &format!("The batch parameter is not valid JSON: {e}"),
                "GraphBatchException",
            )
        }
    };
    if items.is_empty() || items.len() > BATCH_LIMIT {
        return Reply::error(
            StatusCode::BAD_REQUEST,
            100,
            &format!("A batch must contain between 1 and {BATCH_LIMIT} requests"),
            "GraphBatchException",
        );
    }
    let include_headers = incoming
        .param("include_headers")
        .map_or(true, |value| value != "0" && value != "false");

    let mut store = db.write().await;
    let replies: Vec<Value> = items
        .iter()
        .map(|item| {
            debug!(name = ?item.name, method = %item.method, url = %item.relative_url, "batch child");
            let reply = match item.to_incoming(&incoming.files) {
                Ok(child) => dispatch(&mut store, &child),
                Err(reply) => reply,
            };
            reply.to_batch_json(include_headers)
        })
        .collect();
    info!(calls = replies.len(), files = incoming.files.len(), "served batch");
    Reply::json(StatusCode::OK, &Value::Array(replies))
}

async fn read_request(request: Request) -> Result<Incoming, Reply> {
    let (parts, body) = request.into_parts();
    let mut incoming = Incoming {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        params: parts.uri.query().map(|q| parse_form(q.as_bytes())).unwrap_or_default(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect(),
        files: Vec::new(),
    };
    let is_multipart = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        let bytes = to_bytes(body, BODY_LIMIT).await.map_err(bad_body)?;
        incoming.params.extend(parse_form(&bytes));
        return Ok(incoming);
    }

    let mut multipart = Multipart::from_request(Request::from_parts(parts, body), &())
        .await
        .map_err(bad_body)?;
    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(bad_body)?;
                incoming.files.push(UploadedFile {
                    field: name,
                    file_name: Some(file_name),
                    content_type,
                    data: data.to_vec(),
                });
            }
            None => {
                let value = field.text().await.map_err(bad_body)?;
                incoming.params.insert(name, value);
            }
        }
    }
    Ok(incoming)
}

fn bad_body(e: impl std::fmt::Display) -> Reply {
    Reply::error(StatusCode::BAD_REQUEST, 100, &e.to_string(), "ParseException")
}

fn parse_form(bytes: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(bytes).into_owned().collect()
}

fn authenticate(incoming: &Incoming) -> Result<(), Reply> {
    match (incoming.param("app_id"), incoming.param("app_secret")) {
        (Some(APP_ID), Some(APP_SECRET)) => Ok(()),
        _ => Err(Reply::error(
            StatusCode::BAD_REQUEST,
            190,
            "Invalid application credentials",
            "OAuthException",
        )),
    }
}

/// Route one authenticated call. Batch children come through here too.
pub fn dispatch(store: &mut Store, incoming: &Incoming) -> Reply {
    if let Err(reply) = authenticate(incoming) {
        return reply;
    }
    let segments: Vec<&str> = incoming
        .path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    debug!(method = %incoming.method, path = %incoming.path, "dispatching");

    match (incoming.method.as_str(), segments.as_slice()) {
        ("GET", ["me"]) => Reply::json(
            StatusCode::OK,
            &json!({ "id": APP_ID, "name": "Mock application" }),
        ),
        (_, ["echo"]) => echo(incoming),
        ("POST", ["users"]) => create_user(store, incoming),
        ("GET", ["users", id]) => get_user(store, id, incoming),
        ("POST", ["users", id]) => update_user(store, id, incoming),
        ("DELETE", ["users", id]) => delete_user(store, id),
        ("POST", ["users", id, "photos"]) => upload_photo(store, id, incoming),
        ("GET", ["throttled"]) => Reply::error(
            StatusCode::BAD_REQUEST,
            3,
            "Application request limit reached",
            "OAuthException",
        ),
        ("GET", ["maintenance"]) => Reply::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({ "error": 1, "code": 2, "message": "Service temporarily unavailable" }),
        ),
        ("GET", ["legacy"]) => Reply::raw(
            StatusCode::OK,
            "text/plain",
            "access_token=legacy-token&expires=3600",
        ),
        _ => Reply::error(
            StatusCode::NOT_FOUND,
            803,
            &format!("Unknown path components: {}", incoming.path),
            "OAuthException",
        ),
    }
}

fn echo(incoming: &Incoming) -> Reply {
    let params: BTreeMap<&String, &String> = incoming.params.iter().collect();
    let files: Vec<Value> = incoming
        .files
        .iter()
        .map(|file| {
            json!({
                "field": file.field,
                "file_name": file.file_name,
                "content_type": file.content_type,
                "bytes": file.data.len(),
            })
        })
        .collect();
    Reply::json(
        StatusCode::OK,
        &json!({
            "method": incoming.method,
            "path": incoming.path,
            "params": params,
            "user_agent": incoming.header("user-agent"),
            "content_type": incoming.header("content-type"),
            "files": files,
        }),
    )
}

fn unknown_user(id: &str) -> Reply {
    Reply::error(
        StatusCode::NOT_FOUND,
        100,
        &format!("Object with ID '{id}' does not exist"),
        "GraphMethodException",
    )
}

fn user_id(store: &Store, id: &str) -> Result<u64, Reply> {
    id.parse()
        .ok()
        .filter(|id| store.users.contains_key(id))
        .ok_or_else(|| unknown_user(id))
}

fn create_user(store: &mut Store, incoming: &Incoming) -> Reply {
    let Some(name) = incoming.param("name").filter(|name| !name.is_empty()) else {
        return Reply::error(
            StatusCode::BAD_REQUEST,
            100,
            "The parameter name is required",
            "GraphMethodException",
        );
    };
    store.last_user_id += 1;
    let id = store.last_user_id;
    let user = User {
        id: id.to_string(),
        name: name.to_string(),
    };
    store.users.insert(id, Record { user, version: 1 });
    info!(id, "created user");
    // New objects are answered with the bare id.
    Reply::json(StatusCode::OK, &json!(id))
}

fn get_user(store: &Store, id: &str, incoming: &Incoming) -> Reply {
    let id = match user_id(store, id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let Some(record) = store.users.get(&id) else {
        return unknown_user(&id.to_string());
    };
    let etag = format!("\"user-{id}-{}\"", record.version);
    if incoming.header("if-none-match") == Some(etag.as_str()) {
        return Reply {
            status: StatusCode::NOT_MODIFIED,
            headers: Vec::new(),
            body: String::new(),
        }
        .with_header("ETag", &etag);
    }
    Reply::json(StatusCode::OK, &json!(record.user)).with_header("ETag", &etag)
}

fn update_user(store: &mut Store, id: &str, incoming: &Incoming) -> Reply {
    let id = match user_id(store, id) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    if let Some(record) = store.users.get_mut(&id) {
        if let Some(name) = incoming.param("name") {
            record.user.name = name.to_string();
        }
        record.version += 1;
    }
    Reply::json(StatusCode::OK, &json!(true))
}

fn delete_user(store: &mut Store, id: &str) -> Reply {
    match user_id(store, id) {
        Ok(id) => {
            store.users.remove(&id);
            info!(id, "deleted user");
            Reply::json(StatusCode::OK, &json!(true))
        }
        Err(reply) => reply,
    }
}

fn upload_photo(store: &mut Store, id: &str, incoming: &Incoming) -> Reply {
    if let Err(reply) = user_id(store, id) {
        return reply;
    }
    let Some(file) = incoming.files.first() else {
        return Reply::error(
            StatusCode::BAD_REQUEST,
            324,
            "Requires upload file",
            "OAuthException",
        );
    };
    store.last_photo_id += 1;
    Reply::json(
        StatusCode::OK,
        &json!({
            "id": format!("photo-{}", store.last_photo_id),
            "file_name": file.file_name,
            "content_type": file.content_type,
            "bytes": file.data.len(),
            "caption": incoming.param("caption"),
        }),
    )
}
