use crate::error::{Result, SyncError};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha1::{Digest, Sha1};
use time::{macros::format_description, OffsetDateTime};

const PASSWORD_DIGEST_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const NONCE_ENCODING: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
const NONCE_LEN: usize = 20;

/// WS-Security UsernameToken with a password digest.
pub struct UsernameToken<'a> {
    username: &'a str,
    password: &'a str,
    nonce: Vec<u8>,
    created: String,
}

impl<'a> UsernameToken<'a> {
    pub fn generate(username: &'a str, password: &'a str) -> Result<Self> {
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        Ok(Self::with_nonce(username, password, nonce, created_now()?))
    }

    pub fn with_nonce(
        username: &'a str,
        password: &'a str,
        nonce: Vec<u8>,
        created: String,
    ) -> Self {
        Self {
            username,
            password,
            nonce,
            created,
        }
    }

    /// `Base64(SHA1(nonce + created + password))`.
    pub fn password_digest(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(&self.nonce);
        hasher.update(self.created.as_bytes());
        hasher.update(self.password.as_bytes());
        general_purpose::STANDARD.encode(hasher.finalize())
    }

    pub fn header(&self) -> String {
        format!(
            r#"  <s:Header>
    <Security xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" s:mustUnderstand="1">
      <UsernameToken>
        <Username>{}</Username>
        <Password Type="{}">{}</Password>
        <Nonce EncodingType="{}">{}</Nonce>
        <Created xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{}</Created>
      </UsernameToken>
    </Security>
  </s:Header>
"#,
            xml_escape(self.username),
            PASSWORD_DIGEST_TYPE,
            self.password_digest(),
            NONCE_ENCODING,
            general_purpose::STANDARD.encode(&self.nonce),
            self.created
        )
    }
}

fn created_now() -> Result<String> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].000Z");
    OffsetDateTime::now_utc()
        .format(&format)
        .map_err(|err| SyncError::Protocol(format!("wsse timestamp: {err}")))
}

pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_token<'a>() -> UsernameToken<'a> {
        UsernameToken::with_nonce(
            "ad<min>",
            "secret",
            b"0123456789abcdefghij".to_vec(),
            "2026-01-01T00:00:00.000Z".to_string(),
        )
    }

    #[test]
    fn password_digest_matches_known_vector() {
        assert_eq!(fixed_token().password_digest(), "PAsU+r076dcqI8cVHyhczbfxETs=");
    }

    #[test]
    fn header_escapes_username_and_encodes_nonce() {
        let header = fixed_token().header();
        assert!(header.contains("<Username>ad&lt;min&gt;</Username>"));
        assert!(header.contains(">MDEyMzQ1Njc4OWFiY2RlZmdoaWo=</Nonce>"));
        assert!(header.contains(">2026-01-01T00:00:00.000Z</Created>"));
    }

    #[test]
    fn generated_tokens_use_fresh_nonces() {
        let a = UsernameToken::generate("admin", "secret").unwrap();
        let b = UsernameToken::generate("admin", "secret").unwrap();
        assert_eq!(a.nonce.len(), NONCE_LEN);
        assert_ne!(a.nonce, b.nonce);
    }
}
