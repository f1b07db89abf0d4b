use crate::error::{Result, SyncError};
use crate::onvif_requests::OnvifRequest;
use crate::wsse::UsernameToken;
use async_trait::async_trait;
use reqwest::Client;

#[derive(Debug, Clone, PartialEq)]
pub struct SoapResponse {
    pub status: u16,
    pub body: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn post(&self, endpoint: &str, action: &str, envelope: String) -> Result<SoapResponse>;
}

pub struct ReqwestSoapTransport {
    client: Client,
}

impl ReqwestSoapTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SoapTransport for ReqwestSoapTransport {
    async fn post(&self, endpoint: &str, action: &str, envelope: String) -> Result<SoapResponse> {
        let content_type = format!("application/soap+xml; charset=utf-8; action=\"{action}\"");
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", content_type)
            .body(envelope)
            .send()
            .await
            .map_err(|err| {
                SyncError::Connection(format!(
                    "soap request failed for {action} -> {endpoint}: {err}"
                ))
            })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| {
            SyncError::Connection(format!("soap reply from {endpoint} cut short: {err}"))
        })?;
        Ok(SoapResponse { status, body })
    }
}

/// Sends one ONVIF request and returns the body of a successful response.
pub async fn call(
    transport: &dyn SoapTransport,
    endpoint: &str,
    credentials: (&str, &str),
    request: &OnvifRequest,
) -> Result<String> {
    let (user, pass) = credentials;
    let envelope = build_envelope(&UsernameToken::generate(user, pass)?, &request.body);
    let action = format!("{}/{}", request.namespace, request.operation);
    tracing::debug!(operation = request.operation, %endpoint, "soap request");
    let response = transport.post(endpoint, &action, envelope).await?;
    log_response(request.operation, endpoint, &response);
    check(request.operation, response)
}

pub fn build_envelope(token: &UsernameToken<'_>, body: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
{header}  <s:Body xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
    {body}
  </s:Body>
</s:Envelope>
"#,
        header = token.header()
    )
}

fn check(operation: &str, response: SoapResponse) -> Result<String> {
    if response.status < 400 && !response.body.contains("Fault>") {
        return Ok(response.body);
    }
    if is_not_authorized(&response.body) || response.status == 401 {
        return Err(SyncError::Auth(format!("{operation} rejected the credentials")));
    }
    Err(SyncError::Protocol(format!(
        "{operation} failed with HTTP {}{}",
        response.status,
        fault_reason(&response.body)
            .map(|reason| format!(": {reason}"))
            .unwrap_or_default()
    )))
}

fn is_not_authorized(body: &str) -> bool {
    body.contains("NotAuthorized") || body.contains("FailedAuthentication")
}

fn fault_reason(body: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(body).ok()?;
    doc.descendants()
        .find(|node| node.has_tag_name("Reason"))
        .and_then(|reason| reason.descendants().find(|node| node.has_tag_name("Text")))
        .and_then(|text| text.text())
        .map(|text| text.trim().to_string())
}

fn log_response(operation: &str, endpoint: &str, response: &SoapResponse) {
    if response.status >= 400 {
        tracing::warn!(operation, endpoint, status = response.status, "soap request failed");
    } else {
        tracing::trace!(operation, endpoint, status = response.status, body = %response.body, "soap response");
    }
}
