//! In-memory Kintone used by tests.
//!
//! Mounts stateful responders on a `wiremock::MockServer` so that uploaded
//! files can be attached to an app's customization, read back, and
//! downloaded again. Like the real service, attaching a file re-issues its
//! key, so tests must read keys back through the customization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Default)]
struct State {
    /// fileKey -> (name, content)
    files: HashMap<String, (String, Vec<u8>)>,
    next_key: u64,
    /// app id -> stored customization
    customize: HashMap<u64, Value>,
    revision: u64,
}

impl State {
    fn store(&mut self, name: String, content: Vec<u8>) -> String {
        self.next_key += 1;
        let key = format!("fk-{:06}", self.next_key);
        self.files.insert(key.clone(), (name, content));
        key
    }
}

/// Shared fake; clones see the same files and settings.
#[derive(Clone, Default)]
pub(crate) struct FakeKintone {
    state: Arc<Mutex<State>>,
}

impl FakeKintone {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mounts the file and customize endpoints for one namespace.
    pub(crate) async fn mount(&self, server: &MockServer, guest: Option<u64>) {
        let prefix = match guest {
            Some(id) => format!("/k/guest/{}/v1", id),
            None => "/k/v1".to_string(),
        };

        Mock::given(method("POST"))
            .and(path(format!("{}/file.json", prefix)))
            .respond_with(UploadResponder(self.state.clone()))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{}/file.json", prefix)))
            .respond_with(DownloadResponder(self.state.clone()))
            .mount(server)
            .await;

        Mock::given(method("PUT"))
            .and(path(format!("{}/preview/app/customize.json", prefix)))
            .respond_with(PutCustomizeResponder(self.state.clone()))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{}/preview/app/customize.json", prefix)))
            .respond_with(GetCustomizeResponder(self.state.clone()))
            .mount(server)
            .await;
    }

    /// Number of files currently held.
    pub(crate) fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }
}

fn error_response(status: u16, code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "code": code,
        "id": "fake-request-id",
        "message": message,
    }))
}

/// Extracts the filename and content of the single part of a multipart body.
pub(crate) fn parse_single_part(request: &Request) -> Option<(String, Vec<u8>)> {
    let content_type = request.headers.get("content-type")?.to_str().ok()?;
    let boundary = content_type.split("boundary=").nth(1)?.trim().trim_matches('"');
    let body = &request.body;

    let header_end = find(body, b"\r\n\r\n")? + 4;
    let part_headers = String::from_utf8_lossy(&body[..header_end]).to_string();
    let rest = &body[header_end..];
    let end = find(rest, format!("\r\n--{}", boundary).as_bytes())?;

    let name = part_headers
        .split("filename=\"")
        .nth(1)
        .and_then(|s| s.split('"').next())
        .unwrap_or("file")
        .to_string();

    Some((name, rest[..end].to_vec()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn query_value(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

struct UploadResponder(Arc<Mutex<State>>);

impl Respond for UploadResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match parse_single_part(request) {
            Some((name, content)) => {
                let key = self.0.lock().unwrap().store(name, content);
                ResponseTemplate::new(200).set_body_json(json!({ "fileKey": key }))
            }
            None => error_response(400, "CB_VA01", "Missing or invalid input."),
        }
    }
}

struct DownloadResponder(Arc<Mutex<State>>);

impl Respond for DownloadResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let key = query_value(request, "fileKey").unwrap_or_default();
        let state = self.0.lock().unwrap();
        match state.files.get(&key) {
            Some((_, content)) => ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(content.clone()),
            None => error_response(520, "GAIA_BL01", "The specified file was not found."),
        }
    }
}

struct PutCustomizeResponder(Arc<Mutex<State>>);

impl PutCustomizeResponder {
    /// Re-keys FILE entries the way the service does on attach.
    fn attach(state: &mut State, entries: Option<&Value>) -> Result<Vec<Value>, String> {
        let mut stored = Vec::new();
        for entry in entries.and_then(Value::as_array).cloned().unwrap_or_default() {
            match entry["type"].as_str() {
                Some("FILE") => {
                    let key = entry["file"]["fileKey"].as_str().unwrap_or_default();
                    let (name, content) = state
                        .files
                        .remove(key)
                        .ok_or_else(|| format!("The specified file (fileKey: {}) not found.", key))?;
                    let size = content.len();
                    let new_key = state.store(name.clone(), content);
                    stored.push(json!({
                        "type": "FILE",
                        "file": {
                            "fileKey": new_key,
                            "name": name,
                            "contentType": "text/javascript",
                            "size": size.to_string(),
                        }
                    }));
                }
                _ => stored.push(entry),
            }
        }
        Ok(stored)
    }
}

impl Respond for PutCustomizeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return error_response(400, "CB_VA01", "Missing or invalid input."),
        };
        let Some(app) = body["app"].as_u64() else {
            return error_response(400, "CB_VA01", "Missing or invalid input.");
        };

        let mut state = self.0.lock().unwrap();
        let mut attach = |v: Option<&Value>| Self::attach(&mut state, v);
        let desktop_js = attach(body.pointer("/desktop/js"));
        let desktop_css = attach(body.pointer("/desktop/css"));
        let mobile_js = attach(body.pointer("/mobile/js"));
        let mobile_css = attach(body.pointer("/mobile/css"));

        let (desktop_js, desktop_css, mobile_js, mobile_css) =
            match (desktop_js, desktop_css, mobile_js, mobile_css) {
                (Ok(a), Ok(b), Ok(c), Ok(d)) => (a, b, c, d),
                (Err(msg), ..) | (_, Err(msg), ..) | (_, _, Err(msg), _) | (.., Err(msg)) => {
                    return error_response(400, "GAIA_BL01", &msg)
                }
            };

        state.revision += 1;
        let revision = state.revision.to_string();
        state.customize.insert(
            app,
            json!({
                "scope": body["scope"].as_str().unwrap_or("ALL"),
                "desktop": { "js": desktop_js, "css": desktop_css },
                "mobile": { "js": mobile_js, "css": mobile_css },
                "revision": revision,
            }),
        );

        ResponseTemplate::new(200).set_body_json(json!({ "revision": revision }))
    }
}

struct GetCustomizeResponder(Arc<Mutex<State>>);

impl Respond for GetCustomizeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(app) = query_value(request, "app").and_then(|v| v.parse::<u64>().ok()) else {
            return error_response(400, "CB_VA01", "Missing or invalid input.");
        };
        let state = self.0.lock().unwrap();
        let settings = state.customize.get(&app).cloned().unwrap_or_else(|| {
            json!({
                "scope": "ALL",
                "desktop": { "js": [], "css": [] },
                "mobile": { "js": [], "css": [] },
                "revision": "1",
            })
        });
        ResponseTemplate::new(200).set_body_json(settings)
    }
}
