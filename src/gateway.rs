//! Remote data gateway: the backend's REST contract and an HTTP client for it.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cell::{CellValue, Row, row_from_record};
use crate::chart::{Aggregation, ChartCatalog, ChartKind, ChartRequest};
use crate::config::ClientConfig;
use crate::dataset::DatasetSnapshot;
use crate::error::GatewayError;
use crate::session::Session;

/// Where a new row or column goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    End,
    Index(usize),
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Position::End => serializer.serialize_str("end"),
            Position::Index(i) => serializer.serialize_u64(*i as u64),
        }
    }
}

/// Declared type of a new column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Number,
    Boolean,
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" | "text" | "str" => Ok(ColumnType::String),
            "number" | "numeric" | "float" | "int" => Ok(ColumnType::Number),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            other => Err(format!("unknown column type '{}'", other)),
        }
    }
}

/// Column insert request.
#[derive(Clone, Debug, PartialEq)]
pub struct NewColumn {
    pub name: String,
    pub data_type: ColumnType,
    pub default_value: Option<CellValue>,
    pub position: Position,
}

impl NewColumn {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        NewColumn {
            name: name.into(),
            data_type,
            default_value: None,
            position: Position::End,
        }
    }
}

/// Summary returned by a successful upload.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UploadSummary {
    pub session_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub columns: usize,
    #[serde(default)]
    pub column_names: Vec<String>,
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
    #[serde(default)]
    pub preview: Vec<Row>,
}

/// Body of a `chart-data` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartDataRequest {
    pub chart_type: String,
    pub x_column: Option<String>,
    pub y_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    pub aggregation: Aggregation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bins: Option<u32>,
}

impl ChartDataRequest {
    pub fn new(kind: ChartKind, request: &ChartRequest) -> Self {
        ChartDataRequest {
            chart_type: kind.wire_name().to_string(),
            x_column: request.x_column.clone(),
            y_columns: request.y_columns.clone(),
            group_by: request.group_by.clone(),
            aggregation: request.aggregation,
            bins: request.bins,
        }
    }
}

/// Dataset retrieval and mutation, scoped by a session.
///
/// Implementations are stateless request functions; the caller owns any
/// cached state.
#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn upload(
        &self,
        session_id: Option<&str>,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadSummary, GatewayError>;

    /// Fetches the whole active dataset.
    async fn get_data_for_editing(&self, session: &Session) -> Result<DatasetSnapshot, GatewayError>;

    async fn update_cell(
        &self,
        session: &Session,
        row_index: usize,
        column: &str,
        value: &CellValue,
    ) -> Result<(), GatewayError>;

    async fn add_row(&self, session: &Session, row: &Row, position: Position) -> Result<(), GatewayError>;

    async fn delete_row(&self, session: &Session, row_index: usize) -> Result<(), GatewayError>;

    async fn add_column(&self, session: &Session, column: &NewColumn) -> Result<(), GatewayError>;

    async fn delete_column(&self, session: &Session, name: &str) -> Result<(), GatewayError>;

    async fn get_available_charts(&self, session: &Session) -> Result<ChartCatalog, GatewayError>;

    /// Returns the raw, kind-dependent `chart_data` value.
    async fn generate_chart_data(
        &self,
        session: &Session,
        request: &ChartDataRequest,
    ) -> Result<Value, GatewayError>;
}

#[derive(Deserialize)]
struct EditorPage {
    #[serde(default)]
    data: Vec<Row>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    dtypes: BTreeMap<String, String>,
    #[serde(default)]
    total_pages: usize,
}

#[derive(Deserialize)]
struct ChartDataResponse {
    #[serde(default)]
    chart_data: Value,
}

/// `DataGateway` over the backend's JSON REST API.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    http: Client,
    base: Url,
    page_size: usize,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig) -> Result<Self, GatewayError> {
        let base = Url::parse(&config.api_base_url)
            .map_err(|e| GatewayError::Config(format!("api base url '{}': {}", config.api_base_url, e)))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(HttpGateway {
            http,
            base,
            page_size: config.page_size(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config(format!("api base url '{}' cannot hold a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn scoped(builder: RequestBuilder, session: &Session) -> RequestBuilder {
        let builder = builder.query(&[("session_id", session.session_id.as_str())]);
        match &session.active_dataset_id {
            Some(id) => builder.query(&[("file_id", id.as_str())]),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Value, GatewayError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::from_status(status.as_u16(), &body));
        }
        let value: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)?
        };
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = ["error", "message", "detail"]
                .iter()
                .find_map(|k| value.get(*k).and_then(Value::as_str))
                .unwrap_or("unknown error");
            return Err(GatewayError::Rejected(reason.to_string()));
        }
        Ok(value)
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, GatewayError> {
        let value = Self::send(builder).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl DataGateway for HttpGateway {
    async fn upload(
        &self,
        session_id: Option<&str>,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadSummary, GatewayError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(id) = session_id {
            form = form.text("session_id", id.to_string());
        }
        let url = self.endpoint(&["upload", ""])?;
        debug!("uploading {} to {}", filename, url);
        Self::send_json(self.http.post(url).multipart(form)).await
    }

    async fn get_data_for_editing(&self, session: &Session) -> Result<DatasetSnapshot, GatewayError> {
        let url = self.endpoint(&["editor", "data"])?;
        let mut columns = Vec::new();
        let mut dtypes = BTreeMap::new();
        let mut rows = Vec::new();
        let mut page = 1usize;

        loop {
            let builder = self.http.get(url.clone()).query(&[
                ("page", page.to_string()),
                ("page_size", self.page_size.to_string()),
            ]);
            let chunk: EditorPage = Self::send_json(Self::scoped(builder, session)).await?;
            if page == 1 {
                columns = chunk.columns;
                dtypes = chunk.dtypes;
            }
            let fetched = chunk.data.len();
            rows.extend(chunk.data.into_iter().map(row_from_record));
            if fetched == 0 || page >= chunk.total_pages {
                break;
            }
            page += 1;
        }

        debug!("fetched {} rows x {} columns", rows.len(), columns.len());
        Ok(DatasetSnapshot::from_parts(columns, rows, dtypes))
    }

    async fn update_cell(
        &self,
        session: &Session,
        row_index: usize,
        column: &str,
        value: &CellValue,
    ) -> Result<(), GatewayError> {
        let body = json!({
            "file_id": session.active_dataset_id,
            "row_index": row_index,
            "column": column,
            "value": value,
        });
        let url = self.endpoint(&["editor", "cell"])?;
        let builder = self
            .http
            .put(url)
            .query(&[("session_id", session.session_id.as_str())])
            .json(&body);
        Self::send(builder).await.map(|_| ())
    }

    async fn add_row(&self, session: &Session, row: &Row, position: Position) -> Result<(), GatewayError> {
        let body = json!({
            "file_id": session.active_dataset_id,
            "data": row,
            "position": position,
        });
        let url = self.endpoint(&["editor", "row"])?;
        let builder = self
            .http
            .post(url)
            .query(&[("session_id", session.session_id.as_str())])
            .json(&body);
        Self::send(builder).await.map(|_| ())
    }

    async fn delete_row(&self, session: &Session, row_index: usize) -> Result<(), GatewayError> {
        let index = row_index.to_string();
        let url = self.endpoint(&["editor", "row", &index])?;
        Self::send(Self::scoped(self.http.delete(url), session))
            .await
            .map(|_| ())
    }

    async fn add_column(&self, session: &Session, column: &NewColumn) -> Result<(), GatewayError> {
        let body = json!({
            "file_id": session.active_dataset_id,
            "column_name": column.name,
            "data_type": column.data_type,
            "default_value": column.default_value,
            "position": column.position,
        });
        let url = self.endpoint(&["editor", "column"])?;
        let builder = self
            .http
            .post(url)
            .query(&[("session_id", session.session_id.as_str())])
            .json(&body);
        Self::send(builder).await.map(|_| ())
    }

    async fn delete_column(&self, session: &Session, name: &str) -> Result<(), GatewayError> {
        let url = self.endpoint(&["editor", "column", name])?;
        Self::send(Self::scoped(self.http.delete(url), session))
            .await
            .map(|_| ())
    }

    async fn get_available_charts(&self, session: &Session) -> Result<ChartCatalog, GatewayError> {
        let url = self.endpoint(&["visualization", "available-charts"])?;
        let builder = self
            .http
            .get(url)
            .query(&[("session_id", session.session_id.as_str())]);
        Self::send_json(builder).await
    }

    async fn generate_chart_data(
        &self,
        session: &Session,
        request: &ChartDataRequest,
    ) -> Result<Value, GatewayError> {
        let url = self.endpoint(&["visualization", "chart-data"])?;
        let builder = self
            .http
            .post(url)
            .query(&[("session_id", session.session_id.as_str())])
            .json(request);
        let response: ChartDataResponse = Self::send_json(builder).await?;
        Ok(response.chart_data)
    }
}
