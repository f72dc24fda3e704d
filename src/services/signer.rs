//! AWS Signature Version 4 header signing.
//!
//! Produces the `Authorization` header for a request (method, URL, headers
//! and body) under a scoped credential. The callback authenticator uses it to
//! recompute the signature a Lambda function must have sent.
//!
//! [Signature Version 4]: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv.html

use crate::utils::hash::{hmac_sha256, sha256_hex};
use chrono::Utc;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// `X-Amz-Date` format, e.g. `20150830T123600Z`.
pub const DATETIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const TERMINATOR: &str = "aws4_request";

/// Headers that proxies and clients rewrite freely; never part of a signature.
const UNSIGNED_HEADERS: [&str; 4] = ["authorization", "content-length", "user-agent", "x-amzn-trace-id"];

/// Everything except RFC 3986 unreserved characters gets percent-encoded.
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed authorization header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Missing {0}")]
    MissingComponent(&'static str),

    #[error("Invalid request date: {0}")]
    InvalidDate(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

/// `<access key id>/<date>/<region>/<service>/aws4_request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub access_key_id: String,
    pub date: String,
    pub region: String,
    pub service: String,
}

impl CredentialScope {
    /// The scope without the access key id.
    pub fn scope(&self) -> String {
        format!("{}/{}/{}/{}", self.date, self.region, self.service, TERMINATOR)
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.access_key_id, self.scope())
    }
}

impl FromStr for CredentialScope {
    type Err = SignatureError;

    fn from_str(credential: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = credential.split('/').collect();
        match parts.as_slice() {
            [access_key_id, date, region, service, terminator]
                if *terminator == TERMINATOR
                    && !access_key_id.is_empty()
                    && !date.is_empty()
                    && !region.is_empty()
                    && !service.is_empty() =>
            {
                Ok(Self {
                    access_key_id: access_key_id.to_string(),
                    date: date.to_string(),
                    region: region.to_string(),
                    service: service.to_string(),
                })
            }
            _ => Err(SignatureError::MalformedHeader(format!(
                "invalid credential scope '{}'",
                credential
            ))),
        }
    }
}

/// A parsed `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub credential: CredentialScope,
    pub signed_headers: Vec<String>,
    pub signature: String,
}

impl AuthorizationHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        header.parse()
    }
}

impl FromStr for AuthorizationHeader {
    type Err = SignatureError;

    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let (algorithm, components) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| SignatureError::MalformedHeader("missing components".into()))?;
        if algorithm != ALGORITHM {
            return Err(SignatureError::UnsupportedAlgorithm(algorithm.to_string()));
        }

        let mut credential = None;
        let mut signed_headers = None;
        let mut signature = None;
        for component in components.split(',') {
            let (key, value) = component.trim().split_once('=').ok_or_else(|| {
                SignatureError::MalformedHeader(format!("invalid component '{}'", component.trim()))
            })?;
            match key {
                "Credential" => credential = Some(value.parse::<CredentialScope>()?),
                "SignedHeaders" => {
                    signed_headers = Some(value.split(';').map(str::to_string).collect())
                }
                "Signature" => signature = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            credential: credential.ok_or(SignatureError::MissingComponent("Credential"))?,
            signed_headers: signed_headers
                .ok_or(SignatureError::MissingComponent("SignedHeaders"))?,
            signature: signature
                .filter(|s| !s.is_empty())
                .ok_or(SignatureError::MissingComponent("Signature"))?,
        })
    }
}

impl fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Credential={}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.credential,
            self.signed_headers.join(";"),
            self.signature
        )
    }
}

/// The parts of a request that go into its signature.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: Vec<(String, String)>,
    pub body: &'a [u8],
}

impl<'a> SignableRequest<'a> {
    pub fn new(method: &'a str, url: &'a str, body: &'a [u8]) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Result of signing a request.
#[derive(Debug, Clone)]
pub struct Signature {
    pub authorization: AuthorizationHeader,
    /// Headers the caller must send: everything that was signed plus
    /// `authorization`
    pub headers: BTreeMap<String, String>,
    pub canonical_request: String,
    pub string_to_sign: String,
}

impl Signature {
    /// Hex encoded signature.
    pub fn signature(&self) -> &str {
        &self.authorization.signature
    }
}

/// Signs requests with one access key in one region/service.
#[derive(Clone)]
pub struct Signer {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            region: region.into(),
            service: service.into(),
        }
    }

    /// A signer for the access key, region and service named in `scope`.
    pub fn for_scope(scope: &CredentialScope, secret_access_key: impl Into<String>) -> Self {
        Self::new(
            scope.access_key_id.clone(),
            secret_access_key,
            scope.region.clone(),
            scope.service.clone(),
        )
    }

    pub fn with_session_token(mut self, session_token: Option<String>) -> Self {
        self.session_token = session_token.filter(|t| !t.is_empty());
        self
    }

    /// Sign `request`. The `X-Amz-Date` header is used as the request time
    /// when present, otherwise the current time is used and added.
    pub fn sign_request(&self, request: &SignableRequest<'_>) -> Result<Signature, SignatureError> {
        let url = Url::parse(request.url).map_err(|e| SignatureError::InvalidUrl(e.to_string()))?;

        let mut headers: BTreeMap<String, String> = request
            .headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();

        let datetime = headers
            .entry("x-amz-date".to_string())
            .or_insert_with(|| Utc::now().format(DATETIME_FORMAT).to_string())
            .clone();
        let date = datetime
            .get(..8)
            .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| SignatureError::InvalidDate(datetime.clone()))?;

        if !headers.contains_key("host") {
            headers.insert("host".to_string(), host_header(&url)?);
        }
        if let Some(token) = &self.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let signed: Vec<(&String, &String)> = headers
            .iter()
            .filter(|(name, _)| !UNSIGNED_HEADERS.contains(&name.as_str()))
            .collect();
        let signed_headers: Vec<String> = signed.iter().map(|(name, _)| name.to_string()).collect();
        let canonical_headers = signed
            .iter()
            .map(|(name, value)| format!("{}:{}", name, canonical_header_value(value)))
            .collect::<Vec<_>>()
            .join("\n");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n\n{}\n{}",
            request.method.to_uppercase(),
            canonical_path(&url),
            canonical_query(url.query().unwrap_or("")),
            canonical_headers,
            signed_headers.join(";"),
            sha256_hex(request.body)
        );

        let credential = CredentialScope {
            access_key_id: self.access_key_id.clone(),
            date: date.to_string(),
            region: self.region.clone(),
            service: self.service.clone(),
        };

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            datetime,
            credential.scope(),
            sha256_hex(canonical_request.as_bytes())
        );

        let key = signing_key(&self.secret_access_key, date, &self.region, &self.service);
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        let authorization = AuthorizationHeader {
            credential,
            signed_headers,
            signature,
        };
        headers.insert("authorization".to_string(), authorization.to_string());

        Ok(Signature {
            authorization,
            headers,
            canonical_request,
            string_to_sign,
        })
    }
}

/// `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

/// Host header value, with the port only when it is not the scheme default.
fn host_header(url: &Url) -> Result<String, SignatureError> {
    let host = url
        .host_str()
        .ok_or_else(|| SignatureError::InvalidUrl("URL missing host".into()))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Each path segment percent-encoded, slashes preserved.
fn canonical_path(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Query parameters sorted by name then value; bare names get an `=`.
fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut params: Vec<(String, String)> = query
        .split('&')
        .map(|param| match param.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (param.to_string(), String::new()),
        })
        .collect();
    params.sort();
    params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Runs of whitespace collapse to one space, unless the value is quoted.
fn canonical_header_value(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value.to_string()
    } else {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
