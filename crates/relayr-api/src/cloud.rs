use async_trait::async_trait;

use crate::error::Error;

/// Server round-trips that confirm changes to a device's cloud record.
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    /// Push a new display name for `device_id`. Resolves once the server
    /// has acknowledged (or refused) the change.
    async fn update_device_name(&self, device_id: &str, name: &str) -> Result<(), Error>;
}
