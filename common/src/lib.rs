#![warn(clippy::nursery, clippy::pedantic)]

//! Contains common functions and structures used by the server and the CLI.

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use headers::{Header, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const API_ENDPOINT: &str = "/api";

/// How long a paste lives before it is reclaimed.
///
/// Clients that send a value we don't know about get the default (one day)
/// instead of a rejection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExpiresIn {
    OneHour,
    #[default]
    OneDay,
    OneWeek,
    OneMonth,
}

impl ExpiresIn {
    pub const ALL: [Self; 4] = [Self::OneHour, Self::OneDay, Self::OneWeek, Self::OneMonth];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1m",
        }
    }

    /// Maps a wire value to a duration, falling back to the default for
    /// anything unrecognized.
    #[must_use]
    pub fn lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    /// The absolute expiry for a paste created at `from`. A month is a
    /// calendar month, clamped to the end of shorter months.
    #[must_use]
    pub fn expires_at(self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::OneHour => from + Duration::hours(1),
            Self::OneDay => from + Duration::days(1),
            Self::OneWeek => from + Duration::weeks(1),
            Self::OneMonth => from
                .checked_add_months(Months::new(1))
                .unwrap_or_else(|| from + Duration::days(30)),
        }
    }
}

impl Display for ExpiresIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown expiry {0:?}, expected one of 1h, 1d, 1w, 1m")]
pub struct ParseExpiresInError(String);

impl FromStr for ExpiresIn {
    type Err = ParseExpiresInError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseExpiresInError(s.to_owned()))
    }
}

impl Serialize for ExpiresIn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExpiresIn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ExpiresInVisitor;
        impl<'de> Visitor<'de> for ExpiresInVisitor {
            type Value = ExpiresIn;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an expiry such as \"1h\" or \"1d\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ExpiresIn::lenient(v))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
                Ok(ExpiresIn::default())
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
                Ok(ExpiresIn::default())
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
                Ok(ExpiresIn::default())
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
                Ok(ExpiresIn::default())
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(ExpiresIn::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(ExpiresIn::default())
            }
        }

        deserializer.deserialize_any(ExpiresInVisitor)
    }
}

/// Body of a create request.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaste {
    // Missing content is reported as `ContentRequired` rather than as a
    // malformed body.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax: Option<String>,
    #[serde(default)]
    pub expires_in: ExpiresIn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub burn_after_read: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Created {
    pub slug: String,
}

/// A successfully read paste.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PasteView {
    pub content: String,
    pub syntax: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub burn_after_read: bool,
    pub password_protected: bool,
}

impl PasteView {
    #[must_use]
    pub fn expiration_text(&self) -> String {
        match (self.burn_after_read, self.expires_at) {
            (true, _) => "This paste has been burned. You now have the only copy.".to_string(),
            (false, Some(time)) => time
                .format("This paste will expire on %A, %B %-d, %Y at %T %Z.")
                .to_string(),
            (false, None) => "This paste will not expire.".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub const OK: Self = Self { success: true };
}

/// Machine readable error codes returned by the API.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ContentRequired,
    ContentTooLarge,
    NotFound,
    PasswordRequired,
    IncorrectPassword,
    RateLimited,
    StorageUnavailable,
    Internal,
}

/// Coarse grouping of error codes. Missing pastes and password failures are
/// all `AccessDenied`; the code tells a client whether to prompt for a
/// password.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidRequest,
    AccessDenied,
    RateLimited,
    Unavailable,
}

impl ErrorCode {
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::ContentRequired | Self::ContentTooLarge => ErrorCategory::InvalidRequest,
            Self::NotFound | Self::PasswordRequired | Self::IncorrectPassword => {
                ErrorCategory::AccessDenied
            }
            Self::RateLimited => ErrorCategory::RateLimited,
            Self::StorageUnavailable | Self::Internal => ErrorCategory::Unavailable,
        }
    }

    #[must_use]
    pub const fn needs_password(self) -> bool {
        matches!(self, Self::PasswordRequired | Self::IncorrectPassword)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub password_required: bool,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code,
            category: code.category(),
            password_required: code.needs_password(),
        }
    }
}

lazy_static! {
    pub static ref PASSWORD_HEADER_NAME: HeaderName = HeaderName::from_static("x-paste-password");
}

/// Password attempt for a protected paste. An empty header value is treated
/// as if no password was sent.
#[derive(Clone)]
pub struct PastePassword(pub String);

impl fmt::Debug for PastePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PastePassword(..)")
    }
}

impl Header for PastePassword {
    fn name() -> &'static HeaderName {
        &PASSWORD_HEADER_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        // `to_str` only admits visible ASCII; passwords are any UTF-8.
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let value = std::str::from_utf8(value.as_bytes()).map_err(|_| headers::Error::invalid())?;

        if value.is_empty() {
            return Err(headers::Error::invalid());
        }

        Ok(Self(value.to_owned()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, container: &mut E) {
        if let Ok(value) = HeaderValue::from_bytes(self.0.as_bytes()) {
            container.extend(std::iter::once(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn expires_in_falls_back_to_one_day() {
        assert_eq!(ExpiresIn::lenient("1w"), ExpiresIn::OneWeek);
        assert_eq!(ExpiresIn::lenient("6h"), ExpiresIn::OneDay);
        assert_eq!(ExpiresIn::lenient(""), ExpiresIn::OneDay);
    }

    #[test]
    fn create_request_accepts_odd_expiry_values() {
        for body in [
            r#"{"content":"a","expiresIn":"forever"}"#,
            r#"{"content":"a","expiresIn":42}"#,
            r#"{"content":"a","expiresIn":null}"#,
            r#"{"content":"a"}"#,
        ] {
            let parsed: CreatePaste = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.expires_in, ExpiresIn::OneDay, "body: {}", body);
        }

        let parsed: CreatePaste =
            serde_json::from_str(r#"{"content":"a","expiresIn":"1h","burnAfterRead":true}"#)
                .unwrap();
        assert_eq!(parsed.expires_in, ExpiresIn::OneHour);
        assert!(parsed.burn_after_read);
    }

    #[test]
    fn one_month_is_a_calendar_month() {
        let jan_31 = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        assert_eq!(ExpiresIn::OneMonth.expires_at(jan_31), expected);

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(ExpiresIn::OneWeek.expires_at(now), now + Duration::days(7));
    }

    #[test]
    fn access_errors_share_a_category() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::PasswordRequired,
            ErrorCode::IncorrectPassword,
        ] {
            assert_eq!(code.category(), ErrorCategory::AccessDenied);
        }
        assert!(!ErrorCode::NotFound.needs_password());
        assert!(ErrorBody::new(ErrorCode::IncorrectPassword, "Incorrect password").password_required);
    }

    #[test]
    fn empty_password_header_is_rejected() {
        let empty = HeaderValue::from_static("");
        assert!(PastePassword::decode(&mut std::iter::once(&empty)).is_err());

        let value = HeaderValue::from_static("hunter2");
        let decoded = PastePassword::decode(&mut std::iter::once(&value)).unwrap();
        assert_eq!(decoded.0, "hunter2");
    }

    #[test]
    fn non_ascii_password_header_survives() {
        let mut values = Vec::new();
        PastePassword("pässwort".to_string()).encode(&mut values);
        assert_eq!(values.len(), 1);

        let decoded = PastePassword::decode(&mut values.iter()).unwrap();
        assert_eq!(decoded.0, "pässwort");

        let latin1 = HeaderValue::from_bytes(&[b'p', 0xE4, b's', b's']).unwrap();
        assert!(PastePassword::decode(&mut std::iter::once(&latin1)).is_err());
    }
}
