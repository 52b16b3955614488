//! ## Status Reporting System
//!
//! Components report unrecoverable conditions to the supervisor loop over
//! an async channel instead of returning errors from their task bodies.
//! Routine failures (a flaky Jenkins call, a failed sync cycle) are logged
//! and retried in place; only a condition that ends a component's loop is
//! reported here.

use tracing::debug;

use crate::error::ExporterErrorKind;

/// Identifies the component that originated a [`Status`] update.
#[derive(Debug, Clone)]
pub enum StatusSender {
    /// The build collector worker loop.
    Collector(async_channel::Sender<Status>),
    /// The HTTP exposition server.
    Web(async_channel::Sender<Status>),
}

impl StatusSender {
    /// Sends a [`Status`] update.
    pub async fn send(&self, status: Status) -> Result<(), async_channel::SendError<Status>> {
        match self {
            Self::Collector(tx) => {
                debug!("Sending status from Collector: {:?}", status.state);
                tx.send(status).await
            }
            Self::Web(tx) => {
                debug!("Sending status from Web: {:?}", status.state);
                tx.send(status).await
            }
        }
    }
}

/// The condition being reported by a component.
#[derive(Debug)]
pub enum State {
    /// The collector loop ended for a reason other than cancellation.
    CollectorShutdown(ExporterErrorKind),
    /// The HTTP server failed to serve.
    WebServerShutdown(ExporterErrorKind),
}

/// A message reporting the current [`State`] of a component.
#[derive(Debug)]
pub struct Status {
    pub state: State,
}
