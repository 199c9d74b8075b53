//! Optimistic mutation engine.
//!
//! Owns the local dataset snapshot and applies every mutation with the same
//! protocol: issue the remote request, then either patch the snapshot from
//! the confirmed result or pull the authoritative state back wholesale.
//! Local changes always happen after remote confirmation.
//!
//! Calls are independent. Nothing serialises or coalesces overlapping
//! edits, so when two requests race the one that settles last wins. The
//! snapshot `version` (and [`MutationEngine::subscribe`]) lets a caller
//! notice that the data moved under it.

use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;

use crate::cell::{CellValue, Row};
use crate::dataset::DatasetSnapshot;
use crate::error::{GatewayError, SessionError, SyncError};
use crate::gateway::{DataGateway, NewColumn, Position, UploadSummary};
use crate::session::{Session, SessionStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MutationKind {
    CellUpdate,
    RowAdd,
    RowDelete,
    ColumnAdd,
    ColumnDelete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::CellUpdate => "cell update",
            MutationKind::RowAdd => "row add",
            MutationKind::RowDelete => "row delete",
            MutationKind::ColumnAdd => "column add",
            MutationKind::ColumnDelete => "column delete",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum MutationPayload {
    Cell {
        row_index: usize,
        column: String,
        value: CellValue,
    },
    RowAdd {
        row: Row,
        position: Position,
    },
    RowDelete {
        row_index: usize,
    },
    ColumnAdd {
        name: String,
    },
    ColumnDelete {
        name: String,
    },
}

/// One mutation for the lifetime of its request. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub payload: MutationPayload,
    pub applied_locally: bool,
}

/// How a successful mutation reached the local snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settled {
    /// The confirmed change was patched into the snapshot in place.
    Patched,
    /// The snapshot was refetched from the backend.
    Reloaded,
}

struct Inner {
    gateway: Arc<dyn DataGateway>,
    store: Option<Arc<dyn SessionStore>>,
    session: RwLock<Option<Session>>,
    snapshot: Mutex<DatasetSnapshot>,
    version_tx: watch::Sender<u64>,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a mutation settles, however it
/// settles.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    pending: PendingMutation,
}

impl<'a> InFlight<'a> {
    fn start(counter: &'a AtomicUsize, kind: MutationKind, payload: MutationPayload) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        let pending = PendingMutation {
            kind,
            payload,
            applied_locally: false,
        };
        debug!("issuing {}: {:?}", kind, pending.payload);
        InFlight { counter, pending }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        debug!(
            "{} settled (applied locally: {})",
            self.pending.kind, self.pending.applied_locally
        );
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cheap to clone; clones share the same snapshot.
#[derive(Clone)]
pub struct MutationEngine {
    inner: Arc<Inner>,
}

impl MutationEngine {
    pub fn new(gateway: Arc<dyn DataGateway>, session: Option<Session>) -> Self {
        let (version_tx, _) = watch::channel(0);
        MutationEngine {
            inner: Arc::new(Inner {
                gateway,
                store: None,
                session: RwLock::new(session),
                snapshot: Mutex::new(DatasetSnapshot::default()),
                version_tx,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Builds an engine whose session is read from, and written back to,
    /// `store`.
    pub fn with_store(gateway: Arc<dyn DataGateway>, store: Arc<dyn SessionStore>) -> Result<Self, SessionError> {
        let session = Session::load(store.as_ref())?;
        let (version_tx, _) = watch::channel(0);
        Ok(MutationEngine {
            inner: Arc::new(Inner {
                gateway,
                store: Some(store),
                session: RwLock::new(session),
                snapshot: Mutex::new(DatasetSnapshot::default()),
                version_tx,
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    pub fn gateway(&self) -> Arc<dyn DataGateway> {
        Arc::clone(&self.inner.gateway)
    }

    pub fn session(&self) -> Option<Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replaces the session context and persists it when a store is attached.
    /// Storage failures are logged; the in-memory session still changes.
    pub fn set_session(&self, session: Session) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = session.save(store.as_ref()) {
                warn!("could not persist session {}: {}", session.session_id, e);
            }
        }
        *self.inner.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    fn require_session(&self, what: &str) -> Result<Session, SyncError> {
        self.session().ok_or_else(|| {
            warn!("{} ignored: no active session", what);
            SyncError::NoSession
        })
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, DatasetSnapshot> {
        self.inner.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> DatasetSnapshot {
        self.lock_snapshot().clone()
    }

    /// Reads the snapshot in place.
    pub fn with_snapshot<T>(&self, f: impl FnOnce(&DatasetSnapshot) -> T) -> T {
        f(&self.lock_snapshot())
    }

    pub fn version(&self) -> u64 {
        self.lock_snapshot().version
    }

    /// Receives the snapshot version after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version_tx.subscribe()
    }

    /// Mutations issued but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Applies `f` to the snapshot and publishes the new version.
    fn mutate_snapshot<T>(&self, f: impl FnOnce(&mut DatasetSnapshot) -> T) -> T {
        let (out, version) = {
            let mut snapshot = self.lock_snapshot();
            let out = f(&mut snapshot);
            (out, snapshot.version)
        };
        self.inner.version_tx.send_replace(version);
        out
    }

    /// Uploads a dataset, creating the session on first upload, then loads
    /// it into the snapshot.
    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<UploadSummary, SyncError> {
        let existing = self.session();
        let summary = self
            .inner
            .gateway
            .upload(existing.as_ref().map(|s| s.session_id.as_str()), filename, bytes)
            .await?;

        let session = match existing {
            Some(s) if s.session_id == summary.session_id => Session {
                active_dataset_id: None,
                ..s
            },
            _ => Session::new(summary.session_id.clone()),
        };
        info!(
            "uploaded {} ({} rows) into session {}",
            summary.filename, summary.rows, session.session_id
        );
        self.set_session(session);
        self.reload().await?;
        Ok(summary)
    }

    /// Points the session at another dataset and reloads.
    pub async fn switch_dataset(&self, dataset_id: impl Into<String>) -> Result<DatasetSnapshot, SyncError> {
        let session = self.require_session("dataset switch")?;
        self.set_session(session.with_dataset(dataset_id));
        self.reload().await
    }

    /// Replaces the snapshot with the backend's current dataset.
    ///
    /// Idempotent; safe to call at any time as a resync.
    pub async fn reload(&self) -> Result<DatasetSnapshot, SyncError> {
        let session = self.require_session("reload")?;
        let fresh = self.inner.gateway.get_data_for_editing(&session).await?;
        let snapshot = self.mutate_snapshot(|snapshot| {
            snapshot.replace(fresh);
            snapshot.clone()
        });
        debug!(
            "snapshot reloaded: {} rows, {} columns, version {}",
            snapshot.row_count(),
            snapshot.column_count(),
            snapshot.version
        );
        Ok(snapshot)
    }

    async fn reject_with_resync(&self, kind: MutationKind, source: GatewayError) -> SyncError {
        let resynced = match self.reload().await {
            Ok(_) => true,
            Err(e) => {
                warn!("resync after failed {} also failed: {}", kind, e);
                false
            }
        };
        warn!("{} failed: {} (resynced: {})", kind, source, resynced);
        SyncError::Rejected {
            kind,
            source,
            resynced,
        }
    }

    /// Sets one cell. The local value changes only after the backend
    /// confirms; on failure the snapshot is reloaded.
    pub async fn update_cell(
        &self,
        row_index: usize,
        column: &str,
        value: CellValue,
    ) -> Result<Settled, SyncError> {
        let session = self.require_session("cell update")?;
        let mut flight = InFlight::start(
            &self.inner.in_flight,
            MutationKind::CellUpdate,
            MutationPayload::Cell {
                row_index,
                column: column.to_string(),
                value: value.clone(),
            },
        );

        if let Err(e) = self
            .inner
            .gateway
            .update_cell(&session, row_index, column, &value)
            .await
        {
            return Err(self.reject_with_resync(MutationKind::CellUpdate, e).await);
        }

        let patched = self.mutate_snapshot(|s| s.patch_cell(row_index, column, value));
        if patched {
            flight.pending.applied_locally = true;
            info!("cell ({}, {}) updated", row_index, column);
            return Ok(Settled::Patched);
        }

        debug!("row {} / column {} gone locally, reloading", row_index, column);
        self.reload().await?;
        Ok(Settled::Reloaded)
    }

    /// Inserts a row. The backend may fill defaults, so the snapshot is
    /// refetched on success. A failure is reported but not recovered from.
    pub async fn add_row(&self, row: Row, position: Position) -> Result<Settled, SyncError> {
        let session = self.require_session("row add")?;
        let _flight = InFlight::start(
            &self.inner.in_flight,
            MutationKind::RowAdd,
            MutationPayload::RowAdd {
                row: row.clone(),
                position,
            },
        );

        if let Err(source) = self.inner.gateway.add_row(&session, &row, position).await {
            warn!("{} failed: {}", MutationKind::RowAdd, source);
            return Err(SyncError::Rejected {
                kind: MutationKind::RowAdd,
                source,
                resynced: false,
            });
        }

        self.reload().await?;
        info!("row added at {:?}", position);
        Ok(Settled::Reloaded)
    }

    /// Deletes the row at `row_index`. After confirmation the row is spliced
    /// out locally, shifting later rows down; on failure the snapshot is
    /// reloaded.
    pub async fn delete_row(&self, row_index: usize) -> Result<Settled, SyncError> {
        let session = self.require_session("row delete")?;
        let mut flight = InFlight::start(
            &self.inner.in_flight,
            MutationKind::RowDelete,
            MutationPayload::RowDelete { row_index },
        );

        if let Err(e) = self.inner.gateway.delete_row(&session, row_index).await {
            return Err(self.reject_with_resync(MutationKind::RowDelete, e).await);
        }

        if self.mutate_snapshot(|s| s.remove_row(row_index)).is_some() {
            flight.pending.applied_locally = true;
            info!("row {} deleted", row_index);
            return Ok(Settled::Patched);
        }

        debug!("row {} not present locally, reloading", row_index);
        self.reload().await?;
        Ok(Settled::Reloaded)
    }

    /// Adds a column on the backend, then refetches. Nothing changes locally
    /// before confirmation, so a failure needs no rollback.
    pub async fn add_column(&self, column: NewColumn) -> Result<Settled, SyncError> {
        let session = self.require_session("column add")?;
        let _flight = InFlight::start(
            &self.inner.in_flight,
            MutationKind::ColumnAdd,
            MutationPayload::ColumnAdd {
                name: column.name.clone(),
            },
        );

        if let Err(source) = self.inner.gateway.add_column(&session, &column).await {
            warn!("{} '{}' failed: {}", MutationKind::ColumnAdd, column.name, source);
            return Err(SyncError::Rejected {
                kind: MutationKind::ColumnAdd,
                source,
                resynced: false,
            });
        }

        self.reload().await?;
        info!("column '{}' added", column.name);
        Ok(Settled::Reloaded)
    }

    /// Deletes a column. After confirmation the name leaves the column list
    /// and every row; on failure the snapshot is reloaded.
    pub async fn delete_column(&self, name: &str) -> Result<Settled, SyncError> {
        let session = self.require_session("column delete")?;
        let mut flight = InFlight::start(
            &self.inner.in_flight,
            MutationKind::ColumnDelete,
            MutationPayload::ColumnDelete {
                name: name.to_string(),
            },
        );

        if let Err(e) = self.inner.gateway.delete_column(&session, name).await {
            return Err(self.reject_with_resync(MutationKind::ColumnDelete, e).await);
        }

        flight.pending.applied_locally = self.mutate_snapshot(|s| s.remove_column(name));
        info!("column '{}' deleted", name);
        Ok(Settled::Patched)
    }
}
