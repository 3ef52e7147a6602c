use async_trait::async_trait;

use crate::errors::StreamError;
use crate::idl::Message;

/// The outbound half of a server-streaming call, already established by the
/// transport. Implementations must deliver messages from a single caller in
/// the order `send` is awaited.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), StreamError>;
}
