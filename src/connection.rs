//! Connection management
//!
//! A [`ConnectionManager`] hands out [`Connection`]s to an embedded org and
//! establishes their sessions. Connections are cheap `Arc`-backed clones; one
//! established connection is typically shared by every scenario in a run, so
//! all facade calls verify the session is live before touching the org.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::ConnectionConfig;
use crate::error::{ForcestreamError, Result};
use crate::service::EmbeddedOrg;
use crate::sobject::SObjectCollection;
use crate::streaming::StreamingApi;

/// Creates and establishes connections against one org
pub struct ConnectionManager {
    org: EmbeddedOrg,
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(org: EmbeddedOrg, config: ConnectionConfig) -> Self {
        Self { org, config }
    }

    /// Create an unestablished connection
    pub fn create_connection(&self) -> Connection {
        Connection {
            inner: Arc::new(ConnInner {
                org: self.org.clone(),
                config: self.config.clone(),
                session: RwLock::new(None),
            }),
        }
    }

    /// Log the connection in, issuing its session token
    pub async fn establish_connection(&self, conn: &Connection) -> Result<()> {
        let token = self.org.open_session();
        *conn.inner.session.write() = Some(token);
        info!(
            instance_url = %self.config.instance_url,
            api_version = %self.config.api_version,
            "connection established"
        );
        Ok(())
    }
}

struct ConnInner {
    org: EmbeddedOrg,
    config: ConnectionConfig,
    session: RwLock<Option<String>>,
}

/// An authenticated handle to the org, shareable across scenarios
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// CRUD access to an sobject type
    pub fn sobject(&self, sobject_type: impl Into<String>) -> SObjectCollection {
        SObjectCollection::new(self.clone(), sobject_type.into())
    }

    /// Streaming subscriptions and pushes
    pub fn streaming(&self) -> StreamingApi {
        StreamingApi::new(self.clone())
    }

    /// Configuration this connection was created with
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Is there a live session?
    pub fn is_established(&self) -> bool {
        self.inner.session.read().is_some()
    }

    pub(crate) fn require_session(&self) -> Result<()> {
        if self.is_established() {
            Ok(())
        } else {
            Err(ForcestreamError::InvalidSession)
        }
    }

    pub(crate) fn org(&self) -> &EmbeddedOrg {
        &self.inner.org
    }
}
