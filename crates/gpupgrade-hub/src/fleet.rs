//! One connection per agent host, and concurrent fan-out across them.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use gpupgrade_core::agent::{AgentClient, AgentDialer};
use gpupgrade_core::{AgentError, Cluster, Segment};
use tracing::{debug, error};

use crate::error::{ErrorSource, HubError, MultiError};

/// A live handle to the agent on `hostname`. Cheap to clone.
#[derive(Clone)]
pub struct AgentConnection {
    pub hostname: String,
    pub client: Arc<dyn AgentClient>,
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

/// Connections are dialed lazily and reused for the lifetime of the hub.
///
/// There is no cancellation: a dispatch waits for every host it started,
/// and a failing host never stops its siblings.
pub struct AgentFleet {
    dialer: Arc<dyn AgentDialer>,
    connections: Arc<DashMap<String, AgentConnection>>,
}

impl AgentFleet {
    pub fn new(dialer: Arc<dyn AgentDialer>) -> Self {
        Self {
            dialer,
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Hosts with a cached connection, sorted.
    pub fn connected_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        hosts.sort();
        hosts
    }

    /// Run `work` once per host, concurrently, with that host's segments.
    ///
    /// Returns only after every task has finished. Failures, including
    /// dialing failures and panics, are collected per host in `hosts` order.
    pub async fn dispatch<F, Fut>(
        &self,
        cluster: &Arc<Cluster>,
        hosts: &[String],
        work: F,
    ) -> Result<(), MultiError>
    where
        F: Fn(AgentConnection, Vec<Segment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        if hosts.is_empty() {
            return Ok(());
        }

        let work = Arc::new(work);
        let handles: Vec<_> = hosts
            .iter()
            .map(|host| {
                tokio::spawn(run_on_host(
                    host.clone(),
                    Arc::clone(cluster),
                    Arc::clone(&self.dialer),
                    Arc::clone(&self.connections),
                    Arc::clone(&work),
                ))
            })
            .collect();

        let results = futures::future::join_all(handles).await;

        let mut errors = MultiError::new();
        for (host, joined) in hosts.iter().zip(results) {
            let result = joined.unwrap_or_else(|e| Err(HubError::Panicked(e.to_string())));
            if let Err(e) = result {
                error!(host = %host, kind = e.kind(), error = %e, "agent task failed");
                errors.push(ErrorSource::Host(host.clone()), e);
            }
        }
        errors.into_result()
    }
}

async fn run_on_host<F, Fut>(
    host: String,
    cluster: Arc<Cluster>,
    dialer: Arc<dyn AgentDialer>,
    connections: Arc<DashMap<String, AgentConnection>>,
    work: Arc<F>,
) -> Result<(), HubError>
where
    F: Fn(AgentConnection, Vec<Segment>) -> Fut,
    Fut: Future<Output = Result<(), HubError>>,
{
    let segments = cluster.segments_on(&host)?;
    let conn = connect(&dialer, &connections, &host).await?;
    (*work)(conn, segments).await
}

async fn connect(
    dialer: &Arc<dyn AgentDialer>,
    connections: &DashMap<String, AgentConnection>,
    hostname: &str,
) -> Result<AgentConnection, AgentError> {
    if let Some(conn) = connections.get(hostname).map(|c| c.clone()) {
        return Ok(conn);
    }

    debug!(host = hostname, "dialing agent");
    let client = dialer.dial(hostname).await?;
    let conn = connections
        .entry(hostname.to_string())
        .or_insert(AgentConnection {
            hostname: hostname.to_string(),
            client,
        })
        .clone();
    Ok(conn)
}
