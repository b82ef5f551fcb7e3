//! Device identity persistence.

use async_trait::async_trait;
use wacore::store::error::StoreError;
use wacore::store::traits::DeviceStore;
use wacore::store::Device;

use super::{kind, AccountSessionStore, Result};

const DEVICE_KEY: &str = "self";

#[async_trait]
impl DeviceStore for AccountSessionStore {
    async fn save(&self, device: &Device) -> Result<()> {
        // Device key material only round-trips through a binary serde format.
        let data =
            bincode::serialize(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put_record(kind::DEVICE, DEVICE_KEY, &data).await
    }

    async fn load(&self) -> Result<Option<Device>> {
        self.get_record(kind::DEVICE, DEVICE_KEY)
            .await?
            .map(|data| {
                bincode::deserialize(&data).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.get_record(kind::DEVICE, DEVICE_KEY).await?.is_some())
    }

    async fn create(&self) -> Result<i32> {
        // One device per account namespace; its data arrives through save().
        Ok(1)
    }
}
