use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chart::{ChartCatalog, ChartRequest};
use crate::error::ChartError;
use crate::gateway::{ChartDataRequest, DataGateway};
use crate::normalize::{ChartModel, normalize};
use crate::session::Session;

/// Lifecycle of one chart slot.
///
/// `Idle -> Requesting -> Ready | Failed`; a new generation may start from
/// any state except `Requesting`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ChartState {
    #[default]
    Idle,
    Requesting,
    Ready(ChartModel),
    Failed(String),
}

/// One chart on screen and the generation feeding it.
///
/// There is no cancellation: a request that resolves after the user changed
/// the configuration still lands.
pub struct ChartSlot {
    gateway: Arc<dyn DataGateway>,
    state: Mutex<ChartState>,
}

impl ChartSlot {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        ChartSlot {
            gateway,
            state: Mutex::new(ChartState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChartState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ChartState {
        self.lock().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), ChartState::Requesting)
    }

    /// Model from the last successful generation, if the slot holds one.
    pub fn model(&self) -> Option<ChartModel> {
        match &*self.lock() {
            ChartState::Ready(model) => Some(model.clone()),
            _ => None,
        }
    }

    /// Chart kinds the backend offers for the session's dataset.
    pub async fn available(&self, session: Option<&Session>) -> Result<ChartCatalog, ChartError> {
        let session = session.ok_or(ChartError::NoSession)?;
        Ok(self.gateway.get_available_charts(session).await?)
    }

    /// Requests chart data for `request` and normalizes it.
    ///
    /// Preconditions (session, chart type, columns) are checked before any
    /// network call and leave the slot state untouched.
    pub async fn generate(
        &self,
        session: Option<&Session>,
        request: &ChartRequest,
    ) -> Result<ChartModel, ChartError> {
        let session = session.ok_or(ChartError::NoSession)?;
        let kind = request.validate()?;
        {
            let mut state = self.lock();
            if matches!(*state, ChartState::Requesting) {
                return Err(ChartError::Busy);
            }
            *state = ChartState::Requesting;
        }

        debug!("requesting {} chart data for session {}", kind, session.session_id);
        let wire = ChartDataRequest::new(kind, request);
        match self.gateway.generate_chart_data(session, &wire).await {
            Ok(raw) => {
                let model = normalize(kind, &raw, request);
                *self.lock() = ChartState::Ready(model.clone());
                Ok(model)
            }
            Err(e) => {
                warn!("{} chart generation failed: {}", kind, e);
                *self.lock() = ChartState::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Drops any model or error and returns to `Idle`. A request in flight
    /// keeps its state.
    pub fn reset(&self) {
        let mut state = self.lock();
        if !matches!(*state, ChartState::Requesting) {
            *state = ChartState::Idle;
        }
    }
}
