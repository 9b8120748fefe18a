// ── Protocol client seam ──

use async_trait::async_trait;

use crate::command::WriteCommand;
use crate::error::CoreError;

/// Vendor transport that pushes write commands to hardware.
///
/// The engine depends only on the completion signal: the returned future
/// resolves `Ok` once the transport accepted the command and `Err` when
/// transmission failed. Confirmation of the new actual value arrives
/// later through the state store and is none of the engine's business.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn send(&self, command: &WriteCommand) -> Result<(), CoreError>;
}
