//! HTTP Digest (RFC 2617 style) helpers used by the Axis command client.
//!
//! The camera firmware accepts a fixed nonce count of `1` and an empty client
//! nonce, so the per-request response is
//! `MD5(HA1:nonce:1::qop:HA2)` with `HA1 = MD5(user:realm:password)` and
//! `HA2 = MD5(METHOD:uri)`.

use crate::error::{Result, SyncError};
use md5::{Digest, Md5};

const NONCE_COUNT: &str = "1";
const CLIENT_NONCE: &str = "";
const DEFAULT_QOP: &str = "auth";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self> {
        let start = header
            .find("Digest ")
            .ok_or_else(|| SyncError::protocol(format!("not a digest challenge: {header}")))?;
        let params = parse_params(&header[start + "Digest ".len()..]);
        let find = |key: &str| {
            params
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value.clone())
        };
        let realm = find("realm")
            .ok_or_else(|| SyncError::protocol("digest challenge without realm"))?;
        let nonce = find("nonce")
            .ok_or_else(|| SyncError::protocol("digest challenge without nonce"))?;
        // Servers may offer a list such as "auth,auth-int"; we only speak auth.
        let qop = find("qop").map(|qop| {
            qop.split(',')
                .map(str::trim)
                .find(|candidate| *candidate == DEFAULT_QOP)
                .unwrap_or(DEFAULT_QOP)
                .to_string()
        });
        Ok(Self { realm, nonce, qop })
    }
}

/// Per-camera digest state: credentials plus the last accepted challenge.
#[derive(Debug, Clone)]
pub struct DigestContext {
    username: String,
    password: String,
    session: Option<DigestSession>,
}

#[derive(Debug, Clone)]
struct DigestSession {
    realm: String,
    nonce: String,
    qop: String,
    ha1: String,
}

impl DigestContext {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            session: None,
        }
    }

    /// Derives HA1 from a fresh challenge and caches it for later requests.
    pub fn accept_challenge(&mut self, challenge: &DigestChallenge) {
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            self.username, challenge.realm, self.password
        ));
        self.session = Some(DigestSession {
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            qop: challenge
                .qop
                .clone()
                .unwrap_or_else(|| DEFAULT_QOP.to_string()),
            ha1,
        });
    }

    pub fn reset(&mut self) {
        self.session = None;
    }

    /// `Authorization` header for `method uri`, or `None` before any challenge.
    pub fn authorization(&self, method: &str, uri: &str) -> Option<String> {
        let session = self.session.as_ref()?;
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = response_hash(&session.ha1, &session.nonce, &session.qop, &ha2);
        let params = [
            ("username", self.username.as_str()),
            ("realm", session.realm.as_str()),
            ("nonce", session.nonce.as_str()),
            ("uri", uri),
            ("qop", session.qop.as_str()),
            ("response", response.as_str()),
            ("nc", NONCE_COUNT),
            ("cnonce", CLIENT_NONCE),
        ];
        let rendered = params
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\""))
            .collect::<Vec<_>>()
            .join(",");
        Some(format!("Digest {rendered}"))
    }
}

pub fn response_hash(ha1: &str, nonce: &str, qop: &str, ha2: &str) -> String {
    md5_hex(&format!(
        "{ha1}:{nonce}:{NONCE_COUNT}:{CLIENT_NONCE}:{qop}:{ha2}"
    ))
}

pub fn md5_hex(input: &str) -> String {
    Md5::digest(input.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn parse_params(challenge: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = challenge.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        let after = rest[eq + 1..].trim_start();
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim().to_string(), &after[end..]),
                None => (after.trim().to_string(), ""),
            }
        };
        if !key.is_empty() {
            params.push((key, value));
        }
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str = r#"Digest realm="AXIS_ACCC8E000000", nonce="0000a1b2c3d4e5f6", algorithm=MD5, qop="auth""#;

    #[test]
    fn md5_matches_rfc2617_ha1() {
        assert_eq!(
            md5_hex("Mufasa:testrealm@host.com:Circle Of Life"),
            "939e7578ed9e3c518a452acee763bce9"
        );
    }

    #[test]
    fn parses_challenge() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "AXIS_ACCC8E000000");
        assert_eq!(challenge.nonce, "0000a1b2c3d4e5f6");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn picks_auth_from_qop_list() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth,auth-int""#).unwrap();
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn challenge_without_nonce_is_protocol_error() {
        let err = DigestChallenge::parse(r#"Digest realm="r""#).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn no_header_before_challenge() {
        let context = DigestContext::new("root", "pass");
        assert!(context.authorization("GET", "/").is_none());
    }

    #[test]
    fn authorization_matches_known_vector() {
        let mut context = DigestContext::new("root", "pass");
        context.accept_challenge(&DigestChallenge::parse(CHALLENGE).unwrap());
        let header = context
            .authorization("GET", "/axis-cgi/com/ptz.cgi?query=position&camera=1")
            .unwrap();
        assert_eq!(
            header,
            "Digest username=\"root\",realm=\"AXIS_ACCC8E000000\",nonce=\"0000a1b2c3d4e5f6\",\
             uri=\"/axis-cgi/com/ptz.cgi?query=position&camera=1\",qop=\"auth\",\
             response=\"b2da79d02d487c33d4c961ad5ce7f022\",nc=\"1\",cnonce=\"\""
        );
    }

    #[test]
    fn cached_session_recomputes_only_request_hash() {
        let mut context = DigestContext::new("root", "pass");
        context.accept_challenge(&DigestChallenge::parse(CHALLENGE).unwrap());
        let header = context
            .authorization("GET", "/axis-cgi/com/ptz.cgi?gotoserverpresetno=3&camera=1")
            .unwrap();
        assert!(header.contains("response=\"4325ef7a94a810fa8c84a18ffbec44c2\""));
        assert_eq!(
            response_hash(
                "d5e0b51372f9ee226bd1b3f20cc5807a",
                "0000a1b2c3d4e5f6",
                "auth",
                "4fa50c6f2b4d9b9e8eae5f1855192c2f"
            ),
            "4325ef7a94a810fa8c84a18ffbec44c2"
        );
    }
}
