//! Cookie transport for signed values, compatible with Express' `cookie-parser`
//! and `res.cookie(name, value, { signed: true })`.
//!
//! Signed cookies carry the value `s:<token>`, JSON cookies carry
//! `j:<json>`, and values on the wire are percent-encoded the way
//! `encodeURIComponent` does it.

use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::secret::{Keyring, Secret};
use crate::signer::{InvalidInputError, Signer, VerificationFailure};

pub const SIGNED_PREFIX: &str = "s:";
pub const JSON_PREFIX: &str = "j:";

/// A cookie value after prefix handling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CookieValue {
    Text(String),
    Json(serde_json::Value),
}

impl CookieValue {
    /// Interprets `j:`-prefixed values as JSON. Anything that fails to parse
    /// stays text.
    pub fn from_raw(raw: String) -> Self {
        if let Some(json) = raw.strip_prefix(JSON_PREFIX) {
            if let Ok(value) = serde_json::from_str(json) {
                return CookieValue::Json(value);
            }
        }
        CookieValue::Text(raw)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CookieValue::Text(text) => Some(text),
            CookieValue::Json(_) => None,
        }
    }
}

/// Everything a request's `Cookie` header carried, split into unsigned and
/// signed cookies. Signed cookies that failed verification stay visible as
/// `Err` so the caller can treat the request as unauthenticated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    pub cookies: BTreeMap<String, CookieValue>,
    pub signed_cookies: BTreeMap<String, Result<CookieValue, VerificationFailure>>,
}

impl CookieJar {
    /// Parses a `Cookie` header. Without a keyring no cookie is treated as
    /// signed.
    pub fn parse(header: &str, signer: &Signer, keyring: Option<&Keyring>) -> Self {
        let mut jar = CookieJar::default();

        for (name, raw) in parse_cookie_header(header) {
            let signed_token = raw.strip_prefix(SIGNED_PREFIX).map(str::to_string);
            let (Some(keyring), Some(token)) = (keyring, signed_token) else {
                jar.cookies.insert(name, CookieValue::from_raw(raw));
                continue;
            };

            let verified = signer.verify_with(&token, keyring).and_then(|payload| {
                String::from_utf8(payload).map_err(|_| VerificationFailure::Malformed("payload is not UTF-8"))
            });

            match verified {
                Ok(value) => {
                    jar.signed_cookies.insert(name, Ok(CookieValue::from_raw(value)));
                }
                Err(failure) => {
                    debug!(cookie = %name, reason = %failure, "signed cookie rejected");
                    jar.signed_cookies.insert(name, Err(failure));
                }
            }
        }

        jar
    }

    pub fn get(&self, name: &str) -> Option<&CookieValue> {
        self.cookies.get(name)
    }

    /// Returns the value of a signed cookie only if it verified.
    pub fn get_signed(&self, name: &str) -> Option<&CookieValue> {
        self.signed_cookies.get(name).and_then(|value| value.as_ref().ok())
    }
}

/// Splits a `Cookie` header into name/value pairs. The first occurrence of a
/// name wins and values that cannot be percent-decoded are kept verbatim.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for segment in header.split(';') {
        let Some((name, value)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || pairs.iter().any(|(existing, _)| existing == name) {
            continue;
        }

        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        let decoded = if value.contains('%') {
            percent_decode(value).unwrap_or_else(|| value.to_string())
        } else {
            value.to_string()
        };
        pairs.push((name.to_string(), decoded));
    }

    pairs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Builder for a `Set-Cookie` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<Duration>,
    http_only: bool,
    secure: bool,
    same_site: Option<SameSite>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self, InvalidInputError> {
        let name = name.into();
        if !is_token(&name) {
            return Err(InvalidInputError::InvalidCookieName(name));
        }
        Ok(Self {
            name,
            value: value.into(),
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: None,
        })
    }

    /// A cookie whose value is `s:` followed by a token for `value`.
    pub fn signed(
        name: impl Into<String>,
        value: &str,
        signer: &Signer,
        secret: &Secret,
    ) -> Result<Self, InvalidInputError> {
        let token = signer.sign_str(value, secret)?;
        Self::new(name, format!("{SIGNED_PREFIX}{token}"))
    }

    pub fn json(name: impl Into<String>, value: &serde_json::Value) -> Result<Self, InvalidInputError> {
        Self::new(name, format!("{JSON_PREFIX}{value}"))
    }

    /// JSON first, then signed, as Express does for object values. Under
    /// [`TokenFormat::Express`](crate::signer::TokenFormat::Express) the JSON
    /// text must not contain `.` (no floats, no dotted strings); use the
    /// compact format for such values.
    pub fn signed_json(
        name: impl Into<String>,
        value: &serde_json::Value,
        signer: &Signer,
        secret: &Secret,
    ) -> Result<Self, InvalidInputError> {
        Self::signed(name, &format!("{JSON_PREFIX}{value}"), signer, secret)
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn no_path(mut self) -> Self {
        self.path = None;
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unencoded value, including any `s:` / `j:` prefix.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}", self.name, percent_encode(&self.value));
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={domain}"));
        }
        if let Some(path) = &self.path {
            header.push_str(&format!("; Path={path}"));
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            header.push_str("; SameSite=");
            header.push_str(same_site.as_str());
        }
        header
    }
}

fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| (0x21..=0x7e).contains(&b) && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

/// Bytes `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// `decodeURIComponent`; `None` on a broken escape or invalid UTF-8.
fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let well_formed = bytes.iter().enumerate().all(|(index, &byte)| {
        byte != b'%'
            || bytes
                .get(index + 1..index + 3)
                .is_some_and(|escape| escape.iter().all(u8::is_ascii_hexdigit))
    });
    if !well_formed {
        return None;
    }
    percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
