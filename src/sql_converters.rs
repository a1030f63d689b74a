use crate::database_api::DBTime;
use crate::database_api::Document;
use crate::error::Error;
use crate::error::Result;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::SecondsFormat;
use chrono::TimeZone;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use warp::http::StatusCode;

/// Current server time, at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    millis_to_datetime(dt.timestamp_millis()).unwrap_or(dt)
}

pub fn datetime_to_sqlite(dt: DateTime<Utc>) -> SqlValue {
    SqlValue::Integer(dt.timestamp_millis())
}

fn millis_to_datetime(millis: DBTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse a timestamp as accepted on the wire.
///
/// RFC 3339 strings keep their offset and get converted to UTC.
/// Naive date-times (`2025-01-01T00:00:00`, `2025-01-01 00:00:00.5`)
/// and bare dates (`2025-01-01`) are taken as UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(truncate_to_millis(dt.with_timezone(&Utc)));
    }
    for format in &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(truncate_to_millis(Utc.from_utc_datetime(&naive)));
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

//
// Reading typed fields back out of stored documents.
//

fn field<'a>(document: &'a Document, name: &str) -> Result<&'a SqlValue> {
    document.fields.get(name).ok_or_else(|| Error {
        code: StatusCode::INTERNAL_SERVER_ERROR,
        msg: format!("Document {} has no field {}", document.id, name),
    })
}

fn unexpected(document: &Document, name: &str, expected: &str, value: &SqlValue) -> Error {
    Error {
        code: StatusCode::INTERNAL_SERVER_ERROR,
        msg: format!(
            "Document {} field {} should be {}, found {:?}",
            document.id, name, expected, value
        ),
    }
}

pub fn document_text(document: &Document, name: &str) -> Result<String> {
    match field(document, name)? {
        SqlValue::Text(text) => Ok(text.clone()),
        other => Err(unexpected(document, name, "text", other)),
    }
}

pub fn document_integer(document: &Document, name: &str) -> Result<i64> {
    match field(document, name)? {
        SqlValue::Integer(i) => Ok(*i),
        other => Err(unexpected(document, name, "an integer", other)),
    }
}

pub fn document_datetime(document: &Document, name: &str) -> Result<DateTime<Utc>> {
    match field(document, name)? {
        SqlValue::Integer(millis) => millis_to_datetime(*millis)
            .ok_or_else(|| unexpected(document, name, "a valid DateTime", &SqlValue::Integer(*millis))),
        other => Err(unexpected(document, name, "a DateTime", other)),
    }
}
