use crate::errors::AppError;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Local, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::env;
use std::fmt;

/// Body data is URL-safe base64. Messages converted from the SDK always arrive
/// padded; raw wire JSON may omit the padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";
const UNKNOWN_DATE: &str = "Unknown date";

/// A Gmail message as returned by `users.messages.get?format=full`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Option<String>,
    pub internal_date: Option<EpochMillis>,
    pub payload: Option<MessagePart>,
}

/// `internalDate` is an int64 which Gmail serializes as a decimal string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EpochMillis {
    Number(i64),
    Text(String),
}

impl EpochMillis {
    fn millis(&self) -> Option<i64> {
        match self {
            EpochMillis::Number(ms) => Some(*ms),
            EpochMillis::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    pub mime_type: Option<String>,
    pub headers: Option<Vec<Header>>,
    pub body: Option<MessagePartBody>,
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePartBody {
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    pub name: Option<String>,
    pub value: Option<String>,
}

impl MessagePart {
    fn inline_data(&self) -> Option<&str> {
        self.body.as_ref()?.data.as_deref()
    }

    fn is_plain_text(&self) -> bool {
        self.mime_type.as_deref() == Some("text/plain")
    }
}

impl Message {
    /// Receipt time from `internalDate`, if it is a representable instant.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let millis = self.internal_date.as_ref()?.millis()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .as_ref()?
            .iter()
            .filter(|h| h.name.as_deref() == Some(name))
            .filter_map(|h| h.value.as_deref())
            .find(|v| !v.is_empty())
    }
}

impl TryFrom<google_gmail1::api::Message> for Message {
    type Error = AppError;

    fn try_from(message: google_gmail1::api::Message) -> Result<Self, Self::Error> {
        // The SDK types serialize back to Gmail's wire shape; read that with our own decoding.
        let wire = serde_json::to_value(message)?;
        Ok(serde_json::from_value(wire)?)
    }
}

fn decode_body(data: &str) -> Result<String, AppError> {
    let bytes = URL_SAFE_LENIENT.decode(data.trim())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Plain-text body of a message.
///
/// A direct body on the payload wins. Otherwise the first top-level
/// `text/plain` part carrying inline data is used; later parts and nested
/// multiparts are ignored. Anything else yields an empty string.
pub fn extract_body(message: &Message) -> Result<String, AppError> {
    let Some(payload) = &message.payload else {
        return Ok(String::new());
    };

    if let Some(data) = payload.inline_data() {
        return decode_body(data);
    }

    if let Some(parts) = &payload.parts {
        if let Some(data) = parts
            .iter()
            .filter(|part| part.is_plain_text())
            .find_map(MessagePart::inline_data)
        {
            return decode_body(data);
        }
    }

    Ok(String::new())
}

/// Zone used to render receipt times.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LocalZone {
    Named(Tz),
    /// chrono's `Local`: right offset, but printed numerically.
    Offset,
}

/// `TZ` wins when set; only an unset `TZ` consults the system zone name.
fn resolve_zone<F>(tz_var: Option<String>, system_zone: F) -> LocalZone
where
    F: FnOnce() -> Option<String>,
{
    let name = match tz_var {
        // POSIX allows a leading ':' before a zoneinfo name
        Some(tz) => Some(tz.trim_start_matches(':').to_string()),
        None => system_zone(),
    };
    name.and_then(|name| name.parse().ok())
        .map(LocalZone::Named)
        .unwrap_or(LocalZone::Offset)
}

fn format_in(message: &Message, zone: LocalZone) -> String {
    match zone {
        LocalZone::Named(tz) => extract_date_in(message, &tz),
        LocalZone::Offset => extract_date_in(message, &Local),
    }
}

/// Human readable receipt time in the process's local zone.
pub fn extract_date(message: &Message) -> String {
    let zone = resolve_zone(env::var("TZ").ok(), || iana_time_zone::get_timezone().ok());
    format_in(message, zone)
}

/// Like [`extract_date`], rendering the internal timestamp in `zone`.
/// Falls back to the raw `Date` header, then to `Unknown date`.
pub fn extract_date_in<Z>(message: &Message, zone: &Z) -> String
where
    Z: TimeZone,
    Z::Offset: fmt::Display,
{
    if let Some(received) = message.received_at() {
        return received.with_timezone(zone).format(DATE_FORMAT).to_string();
    }

    message
        .header("Date")
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}
