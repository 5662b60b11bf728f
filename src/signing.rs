//! Request signing for the cloud services (Signature Version 4)
//!
//! The queue, topic and parameter clients build a `reqwest::Request`, hand it
//! to a [`Signer`] and then execute it. Every header present at signing time
//! is signed, plus `host` and `x-amz-date`; headers the client adds later are
//! left out of the signature.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const AMZ_DATE: &str = "x-amz-date";
const SECURITY_TOKEN: &str = "x-amz-security-token";

/// Region assumed when an address does not name one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Errors raised while signing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningError(pub String);

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request signing failed: {}", self.0)
    }
}

impl std::error::Error for SigningError {}

/// Access key pair, with a session token for temporary credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and optional `AWS_SESSION_TOKEN`
    pub fn from_env() -> Option<Self> {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Some(Self {
            access_key_id: non_empty("AWS_ACCESS_KEY_ID")?,
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY")?,
            session_token: non_empty("AWS_SESSION_TOKEN"),
        })
    }
}

/// Whether `endpoint` is a public service endpoint, which rejects unsigned calls
pub fn requires_signing(endpoint: &str) -> bool {
    reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .map(|host| host.ends_with(".amazonaws.com") || host.ends_with(".amazonaws.com.cn"))
        .unwrap_or(false)
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError(format!("HMAC key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 3986 encoding with only unreserved characters left as is
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn canonical_query(url: &reqwest::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &reqwest::Url) -> Result<String, SigningError> {
    let host = url
        .host_str()
        .ok_or_else(|| SigningError(format!("no host in {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Signs requests for one service in one region
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    region: String,
    service: &'static str,
}

impl Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>, service: &'static str) -> Self {
        Self {
            credentials,
            region: region.into(),
            service,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Add `host`, `x-amz-date`, the session token and `Authorization`
    pub fn sign(&self, request: &mut reqwest::Request, now: DateTime<Utc>) -> Result<(), SigningError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| SigningError(format!("header value: {}", e)))
        };

        let host = host_header(request.url())?;
        let headers = request.headers_mut();
        headers.insert(HOST, header(&host)?);
        headers.insert(HeaderName::from_static(AMZ_DATE), header(&amz_date)?);
        if let Some(token) = &self.credentials.session_token {
            headers.insert(HeaderName::from_static(SECURITY_TOKEN), header(token)?);
        }
        headers.remove(AUTHORIZATION);

        let mut canonical: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in request.headers() {
            let value = value
                .to_str()
                .map_err(|_| SigningError(format!("header {} is not ASCII", name)))?;
            canonical
                .entry(name.as_str().to_ascii_lowercase())
                .or_default()
                .push(value.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        let canonical_headers: String = canonical
            .iter()
            .map(|(name, values)| format!("{}:{}\n", name, values.join(",")))
            .collect();
        let signed_headers = canonical.keys().cloned().collect::<Vec<_>>().join(";");

        let body = request
            .body()
            .and_then(|body| body.as_bytes())
            .unwrap_or_default();
        let path = match request.url().path() {
            "" => "/",
            path => path,
        };
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method().as_str(),
            path,
            canonical_query(request.url()),
            canonical_headers,
            signed_headers,
            sha256_hex(body)
        );

        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let key = hmac(secret.as_bytes(), &date)?;
        let key = hmac(&key, &self.region)?;
        let key = hmac(&key, self.service)?;
        let key = hmac(&key, "aws4_request")?;
        let signature = hex::encode(hmac(&key, &string_to_sign)?);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, scope, signed_headers, signature
        );
        request.headers_mut().insert(AUTHORIZATION, header(&authorization)?);
        Ok(())
    }
}
