#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const TEST_DEBOUNCE_MS: &str = "150";

pub fn spawn_sidecar(backend_url: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(backend_url, &[])
}

pub fn spawn_sidecar_with(
    backend_url: &str,
    envs: &[(&str, &str)],
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_programd");
    let mut cmd = Command::new(exe);
    cmd.env("PROGRAMD_BACKEND_URL", backend_url)
        .env("PROGRAMD_AUTOSAVE_DEBOUNCE_MS", TEST_DEBOUNCE_MS)
        .env("PROGRAMD_REQUEST_TIMEOUT_SECS", "5")
        .env_remove("GEMINI_API_KEY")
        .env_remove("PROGRAMD_AI_URL")
        .env_remove("PROGRAMD_OUTCOME_PAGE_SIZE")
        .env_remove("RUST_LOG");
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn programd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Returns the `error` object of a failed response.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

/// Poll until `check` holds or the deadline passes.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Value,
    pub api_key: Option<String>,
}

impl Recorded {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MockProgram {
    pub id: u64,
    pub hide_id: bool,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub programs: Vec<MockProgram>,
    /// Flat outcome records: `{id, code, description, subject_area, stage}`.
    pub outcomes: Vec<Value>,
    pub requests: Vec<Recorded>,
    pub fail_outcome_page: Option<u32>,
    pub fail_updates: bool,
    /// Delay before a PUT is applied and answered.
    pub update_delay_ms: u64,
    pub ideas_text: String,
    pub ideas_status: Option<u16>,
}

impl MockState {
    pub fn add_program(&mut self, id: u64, attributes: Value) {
        self.programs.push(MockProgram {
            id,
            hide_id: false,
            attributes: attributes.as_object().cloned().expect("program attributes"),
        });
    }

    fn render_program(&self, p: &MockProgram, populate: bool) -> Value {
        let mut attrs = p.attributes.clone();
        if let Some(Value::Array(ids)) = attrs.get("outcomes").cloned() {
            if populate {
                let data: Vec<Value> = ids
                    .iter()
                    .filter_map(|id| {
                        self.outcomes
                            .iter()
                            .find(|o| o.get("id") == Some(id))
                            .map(render_outcome)
                    })
                    .collect();
                attrs.insert("outcomes".to_string(), json!({ "data": data }));
            } else {
                attrs.remove("outcomes");
            }
        }
        attrs.insert("createdAt".to_string(), json!("2024-01-01T00:00:00.000Z"));
        attrs.insert("updatedAt".to_string(), json!("2024-01-02T00:00:00.000Z"));
        if p.hide_id {
            json!({ "attributes": attrs })
        } else {
            json!({ "id": p.id, "attributes": attrs })
        }
    }
}

fn render_outcome(o: &Value) -> Value {
    let mut attrs = o.as_object().cloned().unwrap_or_default();
    let id = attrs.remove("id").unwrap_or(Value::Null);
    json!({ "id": id, "attributes": attrs })
}

type Shared = Arc<Mutex<MockState>>;

fn record(state: &Shared, method: &str, uri: &Uri, query: Vec<(String, String)>, body: Value) {
    state.lock().expect("mock state").requests.push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        body,
        api_key: None,
    });
}

fn matches_filter(attrs: &Map<String, Value>, key: &str, expected: &str) -> bool {
    let Some(inner) = key.strip_prefix("filters[").and_then(|k| k.strip_suffix(']')) else {
        return true;
    };
    let parts: Vec<&str> = inner.split("][").collect();
    let (path, op) = parts.split_at(parts.len() - 1);
    let mut cur: Option<&Value> = None;
    for (i, seg) in path.iter().enumerate() {
        cur = if i == 0 {
            attrs.get(*seg)
        } else {
            cur.and_then(|v| v.get(*seg))
        };
    }
    let actual = cur.and_then(|v| v.as_str()).unwrap_or("");
    match op[0] {
        "$eq" => actual == expected,
        "$containsi" => actual.to_lowercase().contains(&expected.to_lowercase()),
        _ => true,
    }
}

async fn list_programs(
    State(state): State<Shared>,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
) -> (StatusCode, Json<Value>) {
    record(&state, "GET", &uri, query.clone(), Value::Null);
    let guard = state.lock().expect("mock state");
    let populate = query.iter().any(|(k, _)| k == "populate");
    let data: Vec<Value> = guard
        .programs
        .iter()
        .filter(|p| {
            query
                .iter()
                .all(|(k, v)| matches_filter(&p.attributes, k, v))
        })
        .map(|p| guard.render_program(p, populate))
        .collect();
    (
        StatusCode::OK,
        Json(json!({ "data": data, "meta": { "pagination": { "total": data.len() } } })),
    )
}

async fn create_program(
    State(state): State<Shared>,
    uri: Uri,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    record(&state, "POST", &uri, Vec::new(), body.clone());
    let mut guard = state.lock().expect("mock state");
    let id = guard.programs.iter().map(|p| p.id).max().unwrap_or(0) + 1;
    let attributes = body
        .get("data")
        .and_then(|d| d.as_object())
        .cloned()
        .unwrap_or_default();
    let program = MockProgram {
        id,
        hide_id: false,
        attributes,
    };
    let rendered = guard.render_program(&program, false);
    guard.programs.push(program);
    (StatusCode::OK, Json(json!({ "data": rendered })))
}

async fn update_program(
    State(state): State<Shared>,
    uri: Uri,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    record(&state, "PUT", &uri, Vec::new(), body.clone());
    let delay = state.lock().expect("mock state").update_delay_ms;
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let mut guard = state.lock().expect("mock state");
    if guard.fail_updates {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": { "status": 500, "message": "update rejected" } })),
        );
    }
    let Some(idx) = guard.programs.iter().position(|p| p.id == id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "data": null, "error": { "status": 404, "message": "Not Found" } })),
        );
    };
    if let Some(data) = body.get("data").and_then(|d| d.as_object()) {
        for (k, v) in data {
            guard.programs[idx].attributes.insert(k.clone(), v.clone());
        }
    }
    let program = guard.programs[idx].clone();
    let rendered = guard.render_program(&program, false);
    (StatusCode::OK, Json(json!({ "data": rendered })))
}

async fn list_outcomes(
    State(state): State<Shared>,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
) -> (StatusCode, Json<Value>) {
    record(&state, "GET", &uri, query.clone(), Value::Null);
    let guard = state.lock().expect("mock state");
    let get = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.parse::<usize>().ok())
    };
    let page = get("pagination[page]").unwrap_or(1).max(1);
    let size = get("pagination[pageSize]").unwrap_or(25).max(1);
    if guard.fail_outcome_page == Some(page as u32) {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": { "status": 502, "message": "outcome page unavailable" } })),
        );
    }
    let data: Vec<Value> = guard
        .outcomes
        .iter()
        .skip((page - 1) * size)
        .take(size)
        .map(render_outcome)
        .collect();
    (StatusCode::OK, Json(json!({ "data": data })))
}

async fn generate(
    State(state): State<Shared>,
    uri: Uri,
    Path(_action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let api_key = headers
        .get("x-goog-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let mut guard = state.lock().expect("mock state");
    guard.requests.push(Recorded {
        method: "POST".to_string(),
        path: uri.path().to_string(),
        query: Vec::new(),
        body,
        api_key,
    });
    if let Some(status) = guard.ideas_status {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (code, Json(json!({ "error": { "message": "quota exceeded" } })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": guard.ideas_text }] } }]
        })),
    )
}

/// Content backend and AI provider stand-in, served on its own thread.
pub struct MockBackend {
    pub url: String,
    state: Shared,
}

impl MockBackend {
    pub fn start(initial: MockState) -> Self {
        let state: Shared = Arc::new(Mutex::new(initial));
        let app = Router::new()
            .route("/api/programs", get(list_programs).post(create_program))
            .route("/api/programs/:id", put(update_program))
            .route("/api/outcomes", get(list_outcomes))
            .route("/v1beta/models/:action", post(generate))
            .with_state(Arc::clone(&state));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock backend");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("mock addr");
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("mock runtime");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                axum::serve(listener, app).await.expect("serve mock backend");
            });
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().expect("mock state").requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    /// PUT bodies sent for one field, oldest first.
    pub fn field_updates(&self, program_id: u64, field: &str) -> Vec<Value> {
        self.requests_to("PUT", &format!("/api/programs/{}", program_id))
            .into_iter()
            .filter_map(|r| r.body.get("data").and_then(|d| d.get(field)).cloned())
            .collect()
    }

    pub fn program_attributes(&self, program_id: u64) -> Option<Map<String, Value>> {
        self.state
            .lock()
            .expect("mock state")
            .programs
            .iter()
            .find(|p| p.id == program_id)
            .map(|p| p.attributes.clone())
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().expect("mock state"))
    }
}

pub const PROGRAM_ID: u64 = 7;
pub const PROGRAM_SLUG: &str = "identity-s2";

/// One program at stage S2 plus a small outcome catalog spanning several
/// subjects and stages.
pub fn seeded_state() -> MockState {
    let mut state = MockState::default();
    state.add_program(
        PROGRAM_ID,
        json!({
            "title": "Identity",
            "slug": PROGRAM_SLUG,
            "teacher_name": "Ada Lane",
            "stage": "S2",
            "term_focus": "Term 1 – Identity",
            "keystone_question": "Who am I?",
            "weekly_plans": [
                { "week": "1", "focus": "Me", "activities": "Portraits" },
                { "week": "2", "focus": "Family", "activities": "" }
            ],
            "assessment_method": "<p>Portfolio &amp; demo</p>",
            "evidence_of_learning": "<p>Work samples</p>",
            "teacher_comment": "<p>Great term</p>",
            "engagement_rating": 4,
            "outcomes": []
        }),
    );
    state.outcomes = vec![
        json!({ "id": 1, "code": "EN2-1", "description": "Communicates with peers", "subject_area": "English", "stage": "S2" }),
        json!({ "id": 2, "code": "MA2-3", "description": "Add & subtract", "subject_area": "Mathematics", "stage": "S2" }),
        json!({ "id": 3, "code": "ST2-1", "description": "Questions and predicts", "subject_area": "Science & Technology", "stage": "S2" }),
        json!({ "id": 4, "code": "CG-1", "description": "Circle time", "subject_area": "Circle/Guardian", "stage": "All Stages" }),
        json!({ "id": 5, "code": "EN3-1", "description": "Stage three talk", "subject_area": "English", "stage": "S3" }),
        json!({ "id": 6, "code": "WB-1", "description": "Wellbeing check-in", "subject_area": "Wellbeing", "stage": "S2" }),
    ];
    state
}
