#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use datasheet::cell::{CellValue, Row};
use datasheet::chart::ChartCatalog;
use datasheet::dataset::DatasetSnapshot;
use datasheet::error::GatewayError;
use datasheet::gateway::{ChartDataRequest, DataGateway, NewColumn, Position, UploadSummary};
use datasheet::session::Session;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Three people with a name, an age and a city.
pub fn people() -> DatasetSnapshot {
    DatasetSnapshot::from_parts(
        vec!["name".into(), "age".into(), "city".into()],
        vec![
            row(&[("name", json!("ann")), ("age", json!(31)), ("city", json!("oslo"))]),
            row(&[("name", json!("bob")), ("age", json!(45)), ("city", json!("rome"))]),
            row(&[("name", json!("cy")), ("age", json!(27)), ("city", json!("oslo"))]),
        ],
        BTreeMap::from([
            ("name".to_string(), "object".to_string()),
            ("age".to_string(), "int64".to_string()),
            ("city".to_string(), "object".to_string()),
        ]),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Upload,
    Load,
    UpdateCell,
    AddRow,
    DeleteRow,
    AddColumn,
    DeleteColumn,
    Catalog,
    ChartData,
}

/// Handle on a held gateway call: `reached` fires once the call is parked,
/// sending on `release` lets it finish.
pub struct Gate {
    pub reached: oneshot::Receiver<()>,
    pub release: oneshot::Sender<()>,
}

struct Held {
    op: Op,
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-memory gateway with failure injection and call gating.
///
/// A held call applies its change only after release, like a slow backend.
pub struct ScriptedGateway {
    table: Mutex<DatasetSnapshot>,
    fail_next: Mutex<Vec<Op>>,
    held: Mutex<Vec<Held>>,
    calls: Mutex<Vec<Op>>,
    chart_data: Mutex<Value>,
    catalog: Mutex<ChartCatalog>,
}

impl ScriptedGateway {
    pub fn new(table: DatasetSnapshot) -> Arc<Self> {
        Arc::new(ScriptedGateway {
            table: Mutex::new(table),
            fail_next: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            chart_data: Mutex::new(Value::Null),
            catalog: Mutex::new(ChartCatalog::default()),
        })
    }

    /// Makes the next call of `op` fail with a 500.
    pub fn fail_next(&self, op: Op) {
        self.fail_next.lock().unwrap().push(op);
    }

    /// Parks the next call of `op` until the returned gate is released.
    pub fn hold(&self, op: Op) -> Gate {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.held.lock().unwrap().push(Held {
            op,
            reached: reached_tx,
            release: release_rx,
        });
        Gate {
            reached: reached_rx,
            release: release_tx,
        }
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn table(&self) -> DatasetSnapshot {
        self.table.lock().unwrap().clone()
    }

    /// Changes server data behind the client's back.
    pub fn edit(&self, f: impl FnOnce(&mut DatasetSnapshot)) {
        f(&mut *self.table.lock().unwrap());
    }

    pub fn set_chart_data(&self, value: Value) {
        *self.chart_data.lock().unwrap() = value;
    }

    pub fn set_catalog(&self, catalog: ChartCatalog) {
        *self.catalog.lock().unwrap() = catalog;
    }

    async fn enter(&self, op: Op) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(op);
        let held = {
            let mut held = self.held.lock().unwrap();
            held.iter().position(|h| h.op == op).map(|i| held.remove(i))
        };
        if let Some(held) = held {
            let _ = held.reached.send(());
            let _ = held.release.await;
        }
        let mut failures = self.fail_next.lock().unwrap();
        if let Some(i) = failures.iter().position(|f| *f == op) {
            failures.remove(i);
            return Err(GatewayError::Status {
                status: 500,
                detail: format!("scripted {:?} failure", op),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataGateway for ScriptedGateway {
    async fn upload(
        &self,
        session_id: Option<&str>,
        filename: &str,
        _bytes: Vec<u8>,
    ) -> Result<UploadSummary, GatewayError> {
        self.enter(Op::Upload).await?;
        let table = self.table();
        Ok(UploadSummary {
            session_id: session_id.unwrap_or("scripted-session").to_string(),
            filename: filename.to_string(),
            rows: table.row_count(),
            columns: table.column_count(),
            column_names: table.columns.clone(),
            dtypes: table.dtypes.clone(),
            preview: table.rows.iter().take(5).cloned().collect(),
        })
    }

    async fn get_data_for_editing(&self, _session: &Session) -> Result<DatasetSnapshot, GatewayError> {
        self.enter(Op::Load).await?;
        let mut table = self.table();
        table.version = 0;
        Ok(table)
    }

    async fn update_cell(
        &self,
        _session: &Session,
        row_index: usize,
        column: &str,
        value: &CellValue,
    ) -> Result<(), GatewayError> {
        self.enter(Op::UpdateCell).await?;
        let mut table = self.table.lock().unwrap();
        if table.patch_cell(row_index, column, value.clone()) {
            Ok(())
        } else {
            Err(GatewayError::Status {
                status: 400,
                detail: "Row index out of range".to_string(),
            })
        }
    }

    async fn add_row(&self, _session: &Session, row: &Row, position: Position) -> Result<(), GatewayError> {
        self.enter(Op::AddRow).await?;
        let mut table = self.table.lock().unwrap();
        let mut full = Map::new();
        for column in table.columns.clone() {
            full.insert(column.clone(), row.get(&column).cloned().unwrap_or(Value::Null));
        }
        match position {
            Position::Index(i) if i <= table.rows.len() => table.rows.insert(i, full),
            _ => table.rows.push(full),
        }
        Ok(())
    }

    async fn delete_row(&self, _session: &Session, row_index: usize) -> Result<(), GatewayError> {
        self.enter(Op::DeleteRow).await?;
        match self.table.lock().unwrap().remove_row(row_index) {
            Some(_) => Ok(()),
            None => Err(GatewayError::Status {
                status: 400,
                detail: "Row index out of range".to_string(),
            }),
        }
    }

    async fn add_column(&self, _session: &Session, column: &NewColumn) -> Result<(), GatewayError> {
        self.enter(Op::AddColumn).await?;
        let mut table = self.table.lock().unwrap();
        if table.has_column(&column.name) {
            return Err(GatewayError::Status {
                status: 400,
                detail: "Column already exists".to_string(),
            });
        }
        let default = column.default_value.clone().unwrap_or(Value::Null);
        table.columns.push(column.name.clone());
        for row in &mut table.rows {
            row.insert(column.name.clone(), default.clone());
        }
        Ok(())
    }

    async fn delete_column(&self, _session: &Session, name: &str) -> Result<(), GatewayError> {
        self.enter(Op::DeleteColumn).await?;
        if self.table.lock().unwrap().remove_column(name) {
            Ok(())
        } else {
            Err(GatewayError::Status {
                status: 400,
                detail: "Column not found".to_string(),
            })
        }
    }

    async fn get_available_charts(&self, _session: &Session) -> Result<ChartCatalog, GatewayError> {
        self.enter(Op::Catalog).await?;
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn generate_chart_data(
        &self,
        _session: &Session,
        _request: &ChartDataRequest,
    ) -> Result<Value, GatewayError> {
        self.enter(Op::ChartData).await?;
        Ok(self.chart_data.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// HTTP fake of the backend, for exercising HttpGateway end to end.
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Default)]
pub struct Backend {
    /// session id -> (file id, table), most recent upload last
    pub sessions: HashMap<String, Vec<(String, Table)>>,
    /// Every chart-data body received
    pub chart_requests: Vec<Value>,
}

impl Backend {
    fn table_mut(&mut self, scope: &Scope) -> Result<&mut Table, Response> {
        let files = self
            .sessions
            .get_mut(&scope.session_id)
            .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Session not found"))?;
        let found = match &scope.file_id {
            Some(id) => files.iter_mut().find(|(fid, _)| fid == id),
            None => files.last_mut(),
        };
        found
            .map(|(_, table)| table)
            .ok_or_else(|| fail(StatusCode::NOT_FOUND, "File not found"))
    }
}

pub type Shared = Arc<Mutex<Backend>>;

#[derive(Debug, Deserialize)]
struct Scope {
    session_id: String,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
}

impl Scope {
    fn with_file(mut self, body: &Value) -> Self {
        if let Some(id) = body.get("file_id").and_then(Value::as_str) {
            self.file_id = Some(id.to_string());
        }
        self
    }
}

fn fail(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

fn ok() -> Response {
    Json(json!({ "success": true })).into_response()
}

fn parse_csv(bytes: &[u8]) -> Table {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let columns: Vec<String> = lines
        .next()
        .map(|h| h.split(',').map(|c| c.trim().to_string()).collect())
        .unwrap_or_default();
    let rows = lines
        .map(|line| {
            columns
                .iter()
                .zip(line.split(','))
                .map(|(c, raw)| {
                    let raw = raw.trim();
                    let value = raw
                        .parse::<i64>()
                        .map(Value::from)
                        .or_else(|_| raw.parse::<f64>().map(Value::from))
                        .unwrap_or_else(|_| Value::from(raw));
                    (c.clone(), value)
                })
                .collect()
        })
        .collect();
    Table { columns, rows }
}

fn dtype(table: &Table, column: &str) -> &'static str {
    let numeric = table
        .rows
        .iter()
        .filter_map(|r| r.get(column))
        .all(|v| v.is_number() || v.is_null());
    if numeric { "float64" } else { "object" }
}

async fn upload(State(state): State<Shared>, mut multipart: Multipart) -> Response {
    let mut session_id = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("session_id") => session_id = Some(field.text().await.unwrap()),
            Some("file") => {
                let name = field.file_name().unwrap_or("upload.csv").to_string();
                file = Some((name, field.bytes().await.unwrap()));
            }
            _ => {}
        }
    }
    let Some((filename, bytes)) = file else {
        return fail(StatusCode::BAD_REQUEST, "No file uploaded");
    };

    let table = parse_csv(&bytes);
    let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let file_id = uuid::Uuid::new_v4().to_string();
    let summary = json!({
        "session_id": session_id,
        "filename": filename,
        "rows": table.rows.len(),
        "columns": table.columns.len(),
        "column_names": table.columns,
        "dtypes": table.columns.iter().map(|c| (c.clone(), json!(dtype(&table, c)))).collect::<Map<String, Value>>(),
        "preview": table.rows.iter().take(5).collect::<Vec<_>>(),
    });
    state
        .lock()
        .unwrap()
        .sessions
        .entry(session_id)
        .or_default()
        .push((file_id, table));
    Json(summary).into_response()
}

async fn editor_data(State(state): State<Shared>, Query(scope): Query<Scope>) -> Response {
    let page = scope.page.unwrap_or(1).max(1);
    let page_size = scope.page_size.unwrap_or(100).clamp(1, 1000);
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    let total_rows = table.rows.len();
    let total_pages = total_rows.div_ceil(page_size);
    let start = (page - 1) * page_size;
    let data: Vec<Value> = table
        .rows
        .iter()
        .enumerate()
        .skip(start)
        .take(page_size)
        .map(|(i, r)| {
            let mut record = r.clone();
            record.insert("_row_index".to_string(), json!(i));
            Value::Object(record)
        })
        .collect();
    let dtypes: Map<String, Value> = table
        .columns
        .iter()
        .map(|c| (c.clone(), json!(dtype(table, c))))
        .collect();
    Json(json!({
        "data": data,
        "columns": table.columns,
        "dtypes": dtypes,
        "total_rows": total_rows,
        "total_pages": total_pages,
        "page": page,
        "page_size": page_size,
    }))
    .into_response()
}

async fn update_cell(State(state): State<Shared>, Query(scope): Query<Scope>, Json(body): Json<Value>) -> Response {
    let scope = scope.with_file(&body);
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    let index = body["row_index"].as_u64().unwrap_or(u64::MAX) as usize;
    let column = body["column"].as_str().unwrap_or_default();
    if !table.columns.iter().any(|c| c == column) {
        return fail(StatusCode::BAD_REQUEST, &format!("Column '{}' not found", column));
    }
    match table.rows.get_mut(index) {
        Some(row) => {
            row.insert(column.to_string(), body["value"].clone());
            ok()
        }
        None => fail(StatusCode::BAD_REQUEST, "Row index out of range"),
    }
}

async fn add_row(State(state): State<Shared>, Query(scope): Query<Scope>, Json(body): Json<Value>) -> Response {
    let scope = scope.with_file(&body);
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    let data = body["data"].as_object().cloned().unwrap_or_default();
    let row: Map<String, Value> = table
        .columns
        .iter()
        .map(|c| (c.clone(), data.get(c).cloned().unwrap_or(Value::Null)))
        .collect();
    match body["position"].as_u64() {
        Some(i) if (i as usize) <= table.rows.len() => table.rows.insert(i as usize, row),
        _ => table.rows.push(row),
    }
    ok()
}

async fn delete_row(State(state): State<Shared>, Path(index): Path<usize>, Query(scope): Query<Scope>) -> Response {
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    if index >= table.rows.len() {
        return fail(StatusCode::BAD_REQUEST, "Row index out of range");
    }
    table.rows.remove(index);
    ok()
}

async fn add_column(State(state): State<Shared>, Query(scope): Query<Scope>, Json(body): Json<Value>) -> Response {
    let scope = scope.with_file(&body);
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    let name = body["column_name"].as_str().unwrap_or_default().to_string();
    if table.columns.contains(&name) {
        return fail(StatusCode::BAD_REQUEST, &format!("Column '{}' already exists", name));
    }
    let default = body["default_value"].clone();
    match body["position"].as_u64() {
        Some(i) if (i as usize) <= table.columns.len() => table.columns.insert(i as usize, name.clone()),
        _ => table.columns.push(name.clone()),
    }
    for row in &mut table.rows {
        row.insert(name.clone(), default.clone());
    }
    ok()
}

async fn delete_column(State(state): State<Shared>, Path(name): Path<String>, Query(scope): Query<Scope>) -> Response {
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    if !table.columns.contains(&name) {
        return fail(StatusCode::BAD_REQUEST, &format!("Column '{}' not found", name));
    }
    table.columns.retain(|c| c != &name);
    for row in &mut table.rows {
        row.remove(&name);
    }
    ok()
}

async fn available_charts(State(state): State<Shared>, Query(scope): Query<Scope>) -> Response {
    let mut backend = state.lock().unwrap();
    let table = match backend.table_mut(&scope) {
        Ok(table) => table,
        Err(response) => return response,
    };
    let (numeric, categorical): (Vec<String>, Vec<String>) = table
        .columns
        .iter()
        .cloned()
        .partition(|c| dtype(table, c) == "float64");
    let mut charts = vec!["histogram"];
    if !numeric.is_empty() {
        charts.extend(["bar", "line", "scatter"]);
    }
    if numeric.len() >= 2 {
        charts.push("heatmap");
    }
    if !categorical.is_empty() {
        charts.push("pie");
    }
    Json(json!({
        "available_charts": charts,
        "numeric_columns": numeric,
        "categorical_columns": categorical,
    }))
    .into_response()
}

/// Serves bar and line data without aggregation; everything else gets a
/// fixed payload of the right shape.
async fn chart_data(State(state): State<Shared>, Query(scope): Query<Scope>, Json(body): Json<Value>) -> Response {
    let mut backend = state.lock().unwrap();
    backend.chart_requests.push(body.clone());
    let table = match backend.table_mut(&scope) {
        Ok(table) => table.clone(),
        Err(response) => return response,
    };
    let column = |name: &str| -> Vec<Value> {
        table
            .rows
            .iter()
            .map(|r| r.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    };
    let x = body["x_column"].as_str().unwrap_or_default();
    let ys: Vec<&str> = body["y_columns"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let chart_data = match body["chart_type"].as_str() {
        Some("bar") | Some("line") => {
            let y: Map<String, Value> = ys.iter().map(|y| (y.to_string(), Value::from(column(y)))).collect();
            json!({ "x": column(x), "y": y })
        }
        Some("pie") => json!({ "labels": column(x), "values": column(ys.first().copied().unwrap_or_default()) }),
        Some("histogram") => json!({ "data": [1, 2, 1], "bins": [0.0, 10.0, 20.0, 30.0] }),
        Some("scatter") => json!({ "data": [{ "name": "points", "x": [1, 2], "y": [3, 4] }] }),
        Some("heatmap") => json!({ "x": ys, "y": ys, "z": [[1.0, 0.5], [0.5, 1.0]] }),
        _ => return fail(StatusCode::BAD_REQUEST, "Unsupported chart type"),
    };
    Json(json!({ "chart_data": chart_data })).into_response()
}

/// Starts the fake backend on an ephemeral port.
///
/// # Returns
/// * the API base URL (ending in `/api`) and the backend state
pub async fn spawn_fake_backend() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(Backend::default()));
    let app = Router::new()
        .route("/api/upload/", post(upload))
        .route("/api/editor/data", get(editor_data))
        .route("/api/editor/cell", put(update_cell))
        .route("/api/editor/row", post(add_row))
        .route("/api/editor/row/:index", delete(delete_row))
        .route("/api/editor/column", post(add_column))
        .route("/api/editor/column/:name", delete(delete_column))
        .route("/api/visualization/available-charts", get(available_charts))
        .route("/api/visualization/chart-data", post(chart_data))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/api", addr), state)
}
