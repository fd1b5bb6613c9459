//! HTTP authentication for the upgrade handshake: Basic and Digest (SHA-256).
//!
//! The server side issues a challenge and verifies the `Authorization` header of the
//! retried request. The client side answers a `WWW-Authenticate` challenge with the
//! matching scheme.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Realm announced in server challenges.
pub const DEFAULT_REALM: &str = "wsmux";

/// Authentication scheme a server challenges with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthScheme {
    /// RFC 7617 Basic.
    #[default]
    Basic,
    /// RFC 7616 Digest with `algorithm=SHA-256` and `qop=auth`.
    Digest,
}

/// User name and password used during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    scheme: AuthScheme,
}

impl Credentials {
    /// Credentials a server challenges for with Basic.
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            scheme: AuthScheme::Basic,
        }
    }

    /// Credentials a server challenges for with Digest/SHA-256.
    #[must_use]
    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Digest,
            ..Self::basic(username, password)
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// Build the `Authorization` header value answering `challenge`, a
    /// `WWW-Authenticate` value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if the challenge uses an unsupported scheme or
    /// digest algorithm, or lacks a nonce.
    pub fn authorization(&self, challenge: &str, method: &str, uri: &str) -> Result<String> {
        let (scheme, params) = split_scheme(challenge);
        if scheme.eq_ignore_ascii_case("basic") {
            return Ok(self.basic_authorization());
        }
        if !scheme.eq_ignore_ascii_case("digest") {
            return Err(Error::Unauthorized);
        }

        let params = parse_params(params);
        if let Some(algorithm) = param(&params, "algorithm") {
            if !algorithm.eq_ignore_ascii_case("SHA-256") {
                return Err(Error::Unauthorized);
            }
        }
        let realm = param(&params, "realm").unwrap_or_default();
        let nonce = param(&params, "nonce").ok_or(Error::Unauthorized)?;
        let qop = param(&params, "qop").map(|q| {
            q.split(',')
                .map(str::trim)
                .find(|q| q.eq_ignore_ascii_case("auth"))
                .unwrap_or("auth")
        });

        let cnonce = random_hex(8)?;
        let nc = "00000001";
        let response = digest_response(
            &self.username,
            realm,
            &self.password,
            method,
            uri,
            nonce,
            qop.map(|q| (nc, cnonce.as_str(), q)),
        );

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm=SHA-256, response=\"{}\"",
            self.username, realm, nonce, uri, response
        );
        if let Some(qop) = qop {
            header.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = param(&params, "opaque") {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        Ok(header)
    }

    fn basic_authorization(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Server-side state for one authenticated handshake.
///
/// Holds the nonce issued in the Digest challenge so the retried request can be
/// verified against it.
#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials: Credentials,
    realm: String,
    nonce: String,
}

impl Authenticator {
    /// Create an authenticator with a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the system random source is unavailable.
    pub fn new(credentials: Credentials) -> Result<Self> {
        Ok(Self {
            credentials,
            realm: DEFAULT_REALM.to_string(),
            nonce: random_hex(16)?,
        })
    }

    /// `WWW-Authenticate` value to send with a `401` response.
    #[must_use]
    pub fn challenge(&self) -> String {
        match self.credentials.scheme {
            AuthScheme::Basic => format!("Basic realm=\"{}\"", self.realm),
            AuthScheme::Digest => format!(
                "Digest realm=\"{}\", qop=\"auth\", algorithm=SHA-256, nonce=\"{}\"",
                self.realm, self.nonce
            ),
        }
    }

    /// Check an `Authorization` header value sent with a `method` request for `uri`.
    ///
    /// A Digest response must name `uri` as its target and answer the `qop="auth"`
    /// challenge with `nc` and `cnonce`.
    #[must_use]
    pub fn verify(&self, authorization: &str, method: &str, uri: &str) -> bool {
        let (scheme, rest) = split_scheme(authorization);
        match self.credentials.scheme {
            AuthScheme::Basic if scheme.eq_ignore_ascii_case("basic") => BASE64
                .decode(rest.trim())
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
                .is_some_and(|pair| {
                    pair.split_once(':')
                        == Some((
                            self.credentials.username.as_str(),
                            self.credentials.password.as_str(),
                        ))
                }),
            AuthScheme::Digest if scheme.eq_ignore_ascii_case("digest") => {
                self.verify_digest(rest, method, uri)
            }
            _ => false,
        }
    }

    fn verify_digest(&self, params: &str, method: &str, uri: &str) -> bool {
        let params = parse_params(params);
        let field = |name: &str| param(&params, name);

        if field("username") != Some(self.credentials.username.as_str())
            || field("realm") != Some(self.realm.as_str())
            || field("nonce") != Some(self.nonce.as_str())
        {
            return false;
        }
        if field("uri") != Some(uri) {
            return false;
        }
        let Some(response) = field("response") else {
            return false;
        };
        let (Some(qop @ "auth"), Some(nc), Some(cnonce)) =
            (field("qop"), field("nc"), field("cnonce"))
        else {
            return false;
        };

        let expected = digest_response(
            &self.credentials.username,
            &self.realm,
            &self.credentials.password,
            method,
            uri,
            &self.nonce,
            Some((nc, cnonce, qop)),
        );
        expected.eq_ignore_ascii_case(response)
    }
}

fn hex_sha256(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// RFC 7616 response value. `qop` carries `(nc, cnonce, qop)` when negotiated.
fn digest_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
    qop: Option<(&str, &str, &str)>,
) -> String {
    let ha1 = hex_sha256(&format!("{username}:{realm}:{password}"));
    let ha2 = hex_sha256(&format!("{method}:{uri}"));
    match qop {
        Some((nc, cnonce, qop)) => hex_sha256(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}")),
        None => hex_sha256(&format!("{ha1}:{nonce}:{ha2}")),
    }
}

fn random_hex(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(std::io::Error::from)?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

fn split_scheme(value: &str) -> (&str, &str) {
    let value = value.trim();
    value.split_once(' ').unwrap_or((value, ""))
}

/// Parse `name=value, name="quoted, value"` lists.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut end = quoted.len();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = i + 1;
                        break;
                    }
                    c => value.push(c),
                }
            }
            (value, &quoted[end..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            (after[..end].trim().to_string(), &after[end..])
        };

        params.push((name, value));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
