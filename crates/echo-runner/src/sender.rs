//! Sender that only logs deliveries.

use async_trait::async_trait;
use echo_core::{Delivery, EchoError, EchoResult, Sender};
use tracing::info;

/// Logs each delivery instead of talking to a chat platform.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, session_id: &str, delivery: &Delivery) -> EchoResult<()> {
        if session_id.trim().is_empty() {
            return Err(EchoError::delivery(session_id, "empty session id"));
        }
        info!(
            session_id = %session_id,
            asset = %delivery.asset_id,
            path = %delivery.path.display(),
            tag = ?delivery.tag,
            "Delivering voice"
        );
        Ok(())
    }
}
