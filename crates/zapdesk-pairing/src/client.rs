//! HTTP side of the pairing client.

use crate::error::PollError;
use crate::poll::{QrFetcher, QrPoll};
use crate::qr::QrFields;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;
use zapdesk_core::{
    dto::{
        AccountCreated, CreateAccountRequest, InviteInfo, QrResponse, ReconnectInfo,
        INVITE_TOKEN_HEADER,
    },
    error::ZapdeskError,
};

/// Server calls the pairing and reconnection flows make.
#[async_trait]
pub trait PairingApi: QrFetcher {
    async fn validate_invite(&self, token: &str) -> Result<InviteInfo, ZapdeskError>;

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> Result<AccountCreated, ZapdeskError>;

    async fn accept_invite(&self, token: &str) -> Result<(), ZapdeskError>;

    async fn validate_reconnect(&self, token: &str) -> Result<ReconnectInfo, ZapdeskError>;

    async fn regenerate_qr(&self, token: &str) -> Result<(), ZapdeskError>;
}

/// How the client identifies itself to the server.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Profile API token.
    Bearer(String),
    /// Invite token, for a user that has no profile yet.
    Invite(String),
    None,
}

/// reqwest-backed `PairingApi`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl HttpTransport {
    pub fn new(base_url: &str, credential: Credential) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        }
    }

    /// WebSocket URL of the realtime bridge, carrying the credential.
    pub fn push_url(&self, reconnect_token: Option<&str>) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        let query = match (&self.credential, reconnect_token) {
            (_, Some(token)) => format!("?reconnect={token}"),
            (Credential::Bearer(token), None) => format!("?token={token}"),
            (Credential::Invite(token), None) => format!("?invite={token}"),
            (Credential::None, None) => String::new(),
        };
        format!("{base}/ws{query}")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::Bearer(token) => req.bearer_auth(token),
            Credential::Invite(token) => req.header(INVITE_TOKEN_HEADER, token),
            Credential::None => req,
        }
    }

    async fn read<T: DeserializeOwned>(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, ZapdeskError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ZapdeskError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ZapdeskError::Upstream(format!(
                "{what}: server returned {status}: {text}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| ZapdeskError::Upstream(format!("{what}: failed to parse response: {e}")))
    }

    fn transport_err(what: &str, e: reqwest::Error) -> ZapdeskError {
        ZapdeskError::Upstream(format!("{what} request failed: {e}"))
    }
}

#[async_trait]
impl QrFetcher for HttpTransport {
    async fn fetch_qr(&self, account_id: Uuid) -> Result<QrPoll, PollError> {
        let url = self.url(&format!("/api/accounts/whatsapp/{account_id}/qr"));
        debug!("qr poll: GET {url}");
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(QrPoll::NotReady),
            StatusCode::TOO_MANY_REQUESTS => Ok(QrPoll::RateLimited),
            s if s.is_success() => {
                let body: QrResponse = resp
                    .json()
                    .await
                    .map_err(|e| PollError::Transport(e.to_string()))?;
                Ok(QrPoll::Ready(QrFields {
                    qr: body.qr,
                    qr_code: body.qr_code,
                    code: body.code,
                }))
            }
            s => Err(PollError::Http { status: s.as_u16() }),
        }
    }
}

#[async_trait]
impl PairingApi for HttpTransport {
    async fn validate_invite(&self, token: &str) -> Result<InviteInfo, ZapdeskError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/invites/{token}")))
            .send()
            .await
            .map_err(|e| Self::transport_err("invite validation", e))?;
        Self::read(resp, "invite").await
    }

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> Result<AccountCreated, ZapdeskError> {
        let resp = self
            .authorize(self.client.post(self.url("/api/accounts/whatsapp")))
            .json(request)
            .send()
            .await
            .map_err(|e| Self::transport_err("create account", e))?;
        Self::read(resp, "create account").await
    }

    async fn accept_invite(&self, token: &str) -> Result<(), ZapdeskError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/invites/{token}/accept")))
            .send()
            .await
            .map_err(|e| Self::transport_err("invite acceptance", e))?;
        Self::read::<serde_json::Value>(resp, "invite acceptance")
            .await
            .map(|_| ())
    }

    async fn validate_reconnect(&self, token: &str) -> Result<ReconnectInfo, ZapdeskError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/reconnect/{token}")))
            .send()
            .await
            .map_err(|e| Self::transport_err("reconnect validation", e))?;
        Self::read(resp, "reconnect token").await
    }

    async fn regenerate_qr(&self, token: &str) -> Result<(), ZapdeskError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/reconnect/{token}/qr")))
            .send()
            .await
            .map_err(|e| Self::transport_err("qr regeneration", e))?;
        Self::read::<serde_json::Value>(resp, "qr regeneration")
            .await
            .map(|_| ())
    }
}
