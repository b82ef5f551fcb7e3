//! Identities, sessions, prekeys, signed prekeys, and sender keys.

use async_trait::async_trait;
use wacore::store::error::StoreError;
use wacore::store::traits::SignalStore;

use super::{kind, AccountSessionStore, Result};

fn parse_key_id(key: &str) -> Result<u32> {
    key.parse()
        .map_err(|e| StoreError::Serialization(format!("bad prekey id '{key}': {e}")))
}

#[async_trait]
impl SignalStore for AccountSessionStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.put_record(kind::IDENTITY, address, &key).await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get_record(kind::IDENTITY, address).await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.delete_record(kind::IDENTITY, address).await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get_record(kind::SESSION, address).await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.put_record(kind::SESSION, address, session).await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.delete_record(kind::SESSION, address).await
    }

    // Upload state is tracked by the library itself; only the record is kept.
    async fn store_prekey(&self, id: u32, record: &[u8], _uploaded: bool) -> Result<()> {
        self.put_record(kind::PREKEY, &id.to_string(), record).await
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get_record(kind::PREKEY, &id.to_string()).await
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        self.delete_record(kind::PREKEY, &id.to_string()).await
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        self.put_record(kind::SIGNED_PREKEY, &id.to_string(), record)
            .await
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.get_record(kind::SIGNED_PREKEY, &id.to_string()).await
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        self.records_of(kind::SIGNED_PREKEY)
            .await?
            .into_iter()
            .map(|(key, record)| Ok((parse_key_id(&key)?, record)))
            .collect()
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        self.delete_record(kind::SIGNED_PREKEY, &id.to_string())
            .await
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.put_record(kind::SENDER_KEY, address, record).await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.get_record(kind::SENDER_KEY, address).await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.delete_record(kind::SENDER_KEY, address).await
    }
}
