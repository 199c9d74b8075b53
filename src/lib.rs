/*!
# Datasheet Client

Client-side core of a browser-style dataset editor and chart builder, built in Rust.

## Overview

A user uploads a tabular file to a data-processing backend, edits it as a
spreadsheet-like grid, and configures charts whose data the backend
computes. This crate holds everything between that user and the backend:
the session context, the local dataset snapshot, the mutation protocol that
keeps the snapshot in step with the server, and the normalization that
turns the backend's chart payloads into one render-ready model.

## Architecture

### Remote Layer
- **Technologies**: reqwest, serde_json, async-trait
- **Key Components**:
  - `DataGateway` - async trait over the backend's upload, editor and visualization endpoints
  - `HttpGateway` - JSON REST implementation with per-request session scoping

### Editing Layer
- **Technologies**: tokio
- **Core Components**:
  - `DatasetSnapshot` - ordered columns and rows, versioned on every change
  - `MutationEngine` - confirm-then-apply edits with a reload on rejection
  - `Session` / `SessionStore` - session id and active dataset, persisted between runs

### Chart Layer
- `ChartRequest` - user configuration with precondition checks
- `ChartPayload` - one variant per backend payload shape
- `normalize` - pure conversion to a `ChartModel` with palette colors
- `ChartSlot` - Idle / Requesting / Ready / Failed lifecycle of one chart
- `graph` (feature `render`) - PNG rendering with plotters

## Key Features

- Cell, row and column edits that never diverge silently from the server
- Paged dataset reload with `_row_index` bookkeeping stripped
- Bar, line, pie, doughnut, histogram, scatter and heatmap charts
- Grouped series, histogram bin labels, size-scaled scatter points
- Configuration from environment variables

## Modules

- **cell**: Cell values and their display/numeric readings
- **dataset**: The local snapshot
- **session**: Session context and its persistence
- **gateway**: Backend contract and HTTP client
- **mutation**: Mutation engine
- **chart**: Chart kinds, requests and the backend catalog
- **payload**: Shape detection of raw chart data
- **normalize**: Chart model construction
- **generator**: Chart generation state machine
- **config**: Client configuration
- **error**: Error types
*/

pub mod cell;
pub mod chart;
pub mod config;
pub mod dataset;
pub mod error;
pub mod gateway;
pub mod generator;
#[cfg(feature = "render")]
pub mod graph;
pub mod mutation;
pub mod normalize;
pub mod payload;
pub mod session;

pub use cell::{CellValue, Row};
pub use chart::{Aggregation, ChartCatalog, ChartKind, ChartRequest};
pub use config::ClientConfig;
pub use dataset::DatasetSnapshot;
pub use error::{ChartError, GatewayError, SessionError, SyncError};
pub use gateway::{ColumnType, DataGateway, HttpGateway, NewColumn, Position};
pub use generator::{ChartSlot, ChartState};
pub use mutation::{MutationEngine, MutationKind, Settled};
pub use normalize::{ChartModel, normalize};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionStore};
