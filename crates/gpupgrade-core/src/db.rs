//! Database session collaborators. The SQL used to read settings lives with
//! the implementation, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DbError;

pub const DEFAULT_DATABASE: &str = "template1";

/// Where to reach a database. Constructing one does not connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectionParams {
    pub fn localhost(port: u16) -> Self {
        Self {
            host: "localhost".into(),
            port,
            database: DEFAULT_DATABASE.into(),
        }
    }
}

#[async_trait]
pub trait DbSession: Send + Sync {
    /// Value of a server setting, as `current_setting(name)` reports it.
    async fn current_setting(&self, name: &str) -> Result<String, DbError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn DbSession>, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_uses_template1() {
        let params = ConnectionParams::localhost(15433);
        assert_eq!(params.host, "localhost");
        assert_eq!(params.port, 15433);
        assert_eq!(params.database, "template1");
    }
}
