//! Authentication cookie decoding and normalization
//!
//! The cookie arrives as base64-encoded JSON (from `--authCookie` or the
//! `AUTH_COOKIE` environment variable). It is normalized into the shape the
//! browser context expects before the first page is created:
//! - `expires` given as a date string becomes epoch seconds
//! - `sameSite` in any casing becomes `Strict`, `Lax` or `None`

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(raw: &str) -> HarnessResult<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => Err(HarnessError::Cookie(format!("unknown sameSite value '{}'", other))),
        }
    }
}

/// A cookie ready to be added to the browser context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    expires: Option<RawExpiry>,
    #[serde(default)]
    http_only: Option<bool>,
    #[serde(default)]
    secure: Option<bool>,
    #[serde(default)]
    same_site: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpiry {
    Seconds(f64),
    Date(String),
}

impl AuthCookie {
    /// Decode an optional raw value. Absent or blank input means no cookie.
    pub fn from_option(raw: Option<&str>) -> HarnessResult<Option<Self>> {
        match raw.map(str::trim) {
            Some(encoded) if !encoded.is_empty() => Self::decode(encoded).map(Some),
            _ => Ok(None),
        }
    }

    /// Decode a base64 JSON cookie and normalize its fields.
    pub fn decode(encoded: &str) -> HarnessResult<Self> {
        let encoded = encoded.trim();
        let bytes = match STANDARD.decode(encoded) {
            Ok(bytes) => bytes,
            Err(e) => URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .map_err(|_| HarnessError::Base64(e))?,
        };
        let raw: RawCookie = serde_json::from_slice(&bytes)?;
        Self::normalize(raw)
    }

    fn normalize(raw: RawCookie) -> HarnessResult<Self> {
        let domain = raw
            .domain
            .filter(|d| !d.is_empty())
            .ok_or_else(|| HarnessError::Cookie(format!("cookie '{}' has no domain", raw.name)))?;

        let expires = match raw.expires {
            None => None,
            Some(RawExpiry::Seconds(seconds)) => Some(seconds),
            Some(RawExpiry::Date(date)) => Some(parse_expiry(&date)?),
        };

        let same_site = raw.same_site.as_deref().map(SameSite::parse).transpose()?;

        Ok(Self {
            name: raw.name,
            value: raw.value,
            domain,
            path: raw.path.unwrap_or_else(|| "/".to_string()),
            expires,
            http_only: raw.http_only.unwrap_or(false),
            secure: raw.secure.unwrap_or(false),
            same_site,
        })
    }
}

/// Accepts plain numeric strings, RFC 3339, RFC 2822 (including the HTTP
/// date form), the JS `Date` string form and zone-less dates, read as UTC.
fn parse_expiry(date: &str) -> HarnessResult<f64> {
    let date = date.trim();
    if let Ok(seconds) = date.parse::<f64>() {
        return Ok(seconds);
    }

    let zoned = DateTime::parse_from_rfc3339(date)
        .or_else(|_| DateTime::parse_from_rfc2822(date))
        .or_else(|_| DateTime::parse_from_str(strip_zone_name(date), JS_DATE_FORMAT));
    if let Ok(parsed) = zoned {
        return Ok(parsed.timestamp_millis() as f64 / 1000.0);
    }

    let naive = NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN)))
        .map_err(|e| HarnessError::Cookie(format!("unparsable expires '{}': {}", date, e)))?;
    Ok(naive.and_utc().timestamp_millis() as f64 / 1000.0)
}

/// `Date.prototype.toString`, e.g. `Tue Jan 01 2030 00:00:00 GMT+0000`
const JS_DATE_FORMAT: &str = "%a %b %d %Y %H:%M:%S GMT%z";

/// Drop the trailing `(Coordinated Universal Time)` a JS date string carries.
fn strip_zone_name(date: &str) -> &str {
    match date.find(" (") {
        Some(at) if date.ends_with(')') => &date[..at],
        _ => date,
    }
}
