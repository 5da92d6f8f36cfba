//! Session lifecycle
//!
//! [`SessionManager`] holds zero or one live [`Session`]. It connects lazily,
//! keeps the session until a read fails, then rebuilds it on the next call.
//! Owned by the scheduler task, so no locking is involved.

use tracing::{debug, info};

use crate::connection::{ConnectionBuilder, Session};
use crate::error::ConnectionError;

#[derive(Debug)]
pub struct SessionManager {
    builder: ConnectionBuilder,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(builder: ConnectionBuilder) -> Self {
        Self {
            builder,
            session: None,
        }
    }

    /// Return the held session, connecting first if there is none
    ///
    /// Liveness is not checked here; a stale session is only discovered when a
    /// read against it fails and [`invalidate`](Self::invalidate) is called.
    ///
    /// # Errors
    /// The connection error when no session is held and connecting fails. The
    /// manager then still holds no session.
    pub async fn current_session(&mut self) -> Result<&Session, ConnectionError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.builder.connect().await?,
        };
        Ok(self.session.insert(session))
    }

    /// Drop the held session so the next call reconnects
    pub fn invalidate(&mut self) {
        if let Some(session) = self.session.take() {
            info!(endpoint = %session.endpoint(), "Discarding stale session");
            session.close();
        }
    }

    /// Close the held session, if any
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(endpoint = %session.endpoint(), "Closing session on shutdown");
            session.close();
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn builder(&self) -> &ConnectionBuilder {
        &self.builder
    }
}
