use crate::digest::{DigestChallenge, DigestContext};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub fn build(timeout: Duration, insecure: bool) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(|err| SyncError::Connection(format!("http client build failed: {err}")))
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub www_authenticate: Option<String>,
    pub body: Bytes,
}

impl HttpReply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Plain GET transport; the digest layer sits on top of it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, authorization: Option<String>) -> Result<HttpReply>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, authorization: Option<String>) -> Result<HttpReply> {
        let mut request = self.client.get(url);
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        let response = request
            .send()
            .await
            .map_err(|err| SyncError::Connection(format!("GET {url} failed: {err}")))?;
        let status = response.status().as_u16();
        let www_authenticate = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| SyncError::Connection(format!("GET {url} body failed: {err}")))?;
        Ok(HttpReply {
            status,
            www_authenticate,
            body,
        })
    }
}

/// Issues `ptz.cgi`-style commands against one camera host, answering digest
/// challenges. One client (and one digest context) per camera.
pub struct DigestClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    context: Mutex<DigestContext>,
}

impl DigestClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        username: &str,
        password: &str,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            context: Mutex::new(DigestContext::new(username, password)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends `command` (path plus query) and returns the raw reply.
    pub async fn send(&self, command: &str) -> Result<HttpReply> {
        let url = format!("{}{}", self.base_url, command);
        let mut context = self.context.lock().await;

        let authorization = context.authorization("GET", command);
        let had_session = authorization.is_some();
        let reply = self.transport.get(&url, authorization).await?;
        if reply.status != StatusCode::UNAUTHORIZED.as_u16() {
            return Ok(reply);
        }

        // Either the first contact or the cached nonce went stale.
        let header = reply.www_authenticate.as_deref().ok_or_else(|| {
            SyncError::Auth(format!("{} (401 without challenge)", self.base_url))
        })?;
        let challenge = DigestChallenge::parse(header)?;
        tracing::debug!(
            host = %self.base_url,
            realm = %challenge.realm,
            stale_session = had_session,
            "answering digest challenge"
        );
        context.accept_challenge(&challenge);
        let authorization = context.authorization("GET", command);
        let retry = self.transport.get(&url, authorization).await?;
        if retry.status == StatusCode::UNAUTHORIZED.as_u16() {
            context.reset();
            return Err(SyncError::Auth(self.base_url.clone()));
        }
        Ok(retry)
    }

    /// Query command: 204 yields an empty string, 2xx the body text.
    pub async fn send_text(&self, command: &str) -> Result<String> {
        let reply = self.send(command).await?;
        match reply.status {
            204 => Ok(String::new()),
            200..=299 => Ok(reply.text()),
            status => Err(SyncError::Protocol(format!(
                "{command} failed with HTTP {status}"
            ))),
        }
    }

    /// Motion/config command: the device acknowledges with 204.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let reply = self.send(command).await?;
        if reply.status == 204 {
            return Ok(());
        }
        Err(SyncError::Protocol(format!(
            "{command} not acknowledged (HTTP {}): {}",
            reply.status,
            reply.text().trim()
        )))
    }

    pub async fn send_binary(&self, command: &str) -> Result<Bytes> {
        let reply = self.send(command).await?;
        if (200..300).contains(&reply.status) {
            return Ok(reply.body);
        }
        Err(SyncError::Protocol(format!(
            "{command} failed with HTTP {}",
            reply.status
        )))
    }
}
