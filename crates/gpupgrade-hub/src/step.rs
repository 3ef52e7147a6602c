//! A bounded, persisted, stream-observable hub operation.
//!
//! ```text
//! Step::begin ──► Running ──► finish / finish_with ──► Finished(ok | err)
//!                    │
//!                    └── dropped unfinished ──► Finished(err), from Drop
//! ```
//!
//! Callers wrap the body with [`catch_panic`] and hand its result to
//! [`Step::finish_with`], so the completion marker is written however the
//! body ends.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use gpupgrade_core::idl::{Message, Status};
use gpupgrade_core::stream::MessageSender;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorSource, HubError, MultiError};
use crate::state::{Outcome, RunningMarker, StepOutcome, StepStore};

pub struct Step {
    store: StepStore,
    marker: RunningMarker,
    stream: Arc<dyn MessageSender>,
    errors: MultiError,
    finished: bool,
}

impl Step {
    /// Claim the state directory for `name`. Fails with
    /// [`HubError::StepAlreadyInProgress`] if another step holds it.
    pub fn begin(
        state_dir: &Path,
        name: &str,
        stream: Arc<dyn MessageSender>,
    ) -> Result<Self, HubError> {
        let store = StepStore::new(state_dir);
        let marker = store.acquire(name)?;
        info!(step = name, run_id = %marker.run_id, "step started");
        Ok(Self {
            store,
            marker,
            stream,
            errors: MultiError::new(),
            finished: false,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.marker.run_id
    }

    pub fn stream(&self) -> Arc<dyn MessageSender> {
        Arc::clone(&self.stream)
    }

    /// Everything that has gone wrong so far, or `None`.
    pub fn err(&self) -> Option<&MultiError> {
        (!self.errors.is_empty()).then_some(&self.errors)
    }

    /// Run one named sub-step, reporting its status on the stream.
    ///
    /// Once anything has failed, later sub-steps are reported `Skipped` and
    /// `work` is dropped unpolled.
    pub async fn run_substep<T, Fut>(&mut self, substep: &str, work: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, HubError>>,
    {
        if !self.errors.is_empty() {
            self.send_status(substep, Status::Skipped).await;
            return None;
        }

        self.send_status(substep, Status::Running).await;
        match work.await {
            Ok(value) => {
                self.send_status(substep, Status::Complete).await;
                Some(value)
            }
            Err(e) => {
                error!(step = %self.marker.step, substep, kind = e.kind(), error = %e, "substep failed");
                self.send_status(substep, Status::Failed).await;
                self.errors.push(ErrorSource::Phase(substep.to_string()), e);
                None
            }
        }
    }

    async fn send_status(&self, substep: &str, status: Status) {
        if let Err(e) = self.stream.send(Message::status(substep, status)).await {
            warn!(step = %self.marker.step, substep, ?status, error = %e, "failed to send step status");
        }
    }

    pub fn finish(self) -> Result<(), MultiError> {
        self.finish_with(Ok(()))
    }

    /// Record `body` as the step's final result, persist the outcome and
    /// release the state directory. Finalization failures are appended after
    /// whatever the body reported.
    pub fn finish_with<T>(mut self, body: Result<T, HubError>) -> Result<T, MultiError> {
        let value = match body {
            Ok(value) => Some(value),
            Err(e) => {
                let source = ErrorSource::Phase(self.marker.step.clone());
                self.errors.push(source, e);
                None
            }
        };
        self.finalize();

        let errors = std::mem::take(&mut self.errors);
        match value {
            Some(value) if errors.is_empty() => Ok(value),
            _ => Err(errors),
        }
    }

    fn finalize(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let step = self.marker.step.clone();
        let outcome = StepOutcome {
            step: step.clone(),
            run_id: self.marker.run_id,
            outcome: if self.errors.is_empty() {
                Outcome::Complete
            } else {
                Outcome::Failed
            },
            error: self.err().map(|e| e.to_string()),
            started_at: self.marker.started_at,
            finished_at: Utc::now(),
        };

        if let Err(source) = self.store.record(&outcome) {
            error!(step = %step, error = %source, "failed to record step outcome");
            self.errors.push(
                ErrorSource::Finalize,
                HubError::Finalize {
                    step: step.clone(),
                    source,
                },
            );
        }
        if let Err(source) = self.store.release() {
            error!(step = %step, error = %source, "failed to release running marker");
            self.errors.push(
                ErrorSource::Finalize,
                HubError::Finalize {
                    step: step.clone(),
                    source,
                },
            );
        }

        match outcome.outcome {
            Outcome::Complete => info!(step = %step, run_id = %outcome.run_id, "step complete"),
            Outcome::Failed => warn!(step = %step, run_id = %outcome.run_id, "step failed"),
        }
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let step = self.marker.step.clone();
        warn!(step = %step, "step dropped before finishing");
        self.errors
            .push(ErrorSource::Phase(step.clone()), HubError::Abandoned { step });
        self.finalize();
    }
}

/// Await `body`, turning a panic into [`HubError::Panicked`].
pub async fn catch_panic<T, Fut>(body: Fut) -> Result<T, HubError>
where
    Fut: Future<Output = Result<T, HubError>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HubError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
