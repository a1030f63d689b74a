use crate::error::Error;
use crate::error::Result;
use crate::sql_converters::format_datetime;
use crate::sql_converters::parse_datetime;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde::Serializer;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use warp::http::status::StatusCode;

//
// Items
//

/// User-supplied fields of an inventory item.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemCreate {
    pub email: String,
    pub item_name: String,
    pub quantity: i64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub expiry_date: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemResponse {
    pub id: String,
    #[serde(flatten)]
    pub item: ItemCreate,
    #[serde(serialize_with = "serialize_timestamp")]
    pub insert_date: DateTime<Utc>,
}

impl ItemCreate {
    pub fn from_json(json: &Value) -> Result<ItemCreate> {
        let mut errors = FieldErrors::new("item");
        let object = errors.object(json)?;
        let email = errors.required_string(object, "email");
        let item_name = errors.required_string(object, "item_name");
        let quantity = errors.required_integer(object, "quantity");
        let expiry_date = errors.required_datetime(object, "expiry_date");
        match (email, item_name, quantity, expiry_date) {
            (Some(email), Some(item_name), Some(quantity), Some(expiry_date)) => Ok(ItemCreate {
                email,
                item_name,
                quantity,
                expiry_date,
            }),
            _ => Err(errors.into_error()),
        }
    }
}

/// Optional constraints of `GET /items/filter`, all of them must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Exact match.
    pub email: Option<String>,
    /// Strictly later than.
    pub expiry_date: Option<DateTime<Utc>>,
    /// Strictly later than.
    pub insert_date: Option<DateTime<Utc>>,
    /// At least.
    pub quantity: Option<i64>,
}

impl ItemFilter {
    pub fn from_query(params: &HashMap<String, String>) -> Result<ItemFilter> {
        let mut errors = FieldErrors::new("item filter");
        let filter = ItemFilter {
            email: query_string(params, "email"),
            expiry_date: errors.query_datetime(params, "expiry_date"),
            insert_date: errors.query_datetime(params, "insert_date"),
            quantity: errors.query_integer(params, "quantity"),
        };
        errors.check()?;
        Ok(filter)
    }
}

/// Number of items created by one email, as returned by `GET /items/aggregate`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EmailCount {
    #[serde(rename = "_id")]
    pub email: String,
    pub count: i64,
}

//
// Clock-in records
//

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ClockInCreate {
    pub email: String,
    pub location: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ClockInResponse {
    pub id: String,
    #[serde(flatten)]
    pub record: ClockInCreate,
    #[serde(serialize_with = "serialize_timestamp")]
    pub insert_datetime: DateTime<Utc>,
}

impl ClockInCreate {
    pub fn from_json(json: &Value) -> Result<ClockInCreate> {
        let mut errors = FieldErrors::new("clock-in record");
        let object = errors.object(json)?;
        let email = errors.required_string(object, "email");
        let location = errors.required_string(object, "location");
        match (email, location) {
            (Some(email), Some(location)) => Ok(ClockInCreate { email, location }),
            _ => Err(errors.into_error()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockInFilter {
    pub email: Option<String>,
    pub location: Option<String>,
    /// Strictly later than.
    pub insert_datetime: Option<DateTime<Utc>>,
}

impl ClockInFilter {
    pub fn from_query(params: &HashMap<String, String>) -> Result<ClockInFilter> {
        let mut errors = FieldErrors::new("clock-in filter");
        let filter = ClockInFilter {
            email: query_string(params, "email"),
            location: query_string(params, "location"),
            insert_datetime: errors.query_datetime(params, "insert_datetime"),
        };
        errors.check()?;
        Ok(filter)
    }
}

//
// Validation helpers
//

/// Collects every problem of an input, so that one response lists all of them.
struct FieldErrors {
    shape: &'static str,
    problems: Vec<String>,
}

impl FieldErrors {
    fn new(shape: &'static str) -> FieldErrors {
        FieldErrors {
            shape,
            problems: Vec::new(),
        }
    }

    fn into_error(self) -> Error {
        Error {
            code: StatusCode::UNPROCESSABLE_ENTITY,
            msg: format!("Invalid {}: {}", self.shape, self.problems.join("; ")),
        }
    }

    fn check(self) -> Result<()> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    fn object<'a>(&self, json: &'a Value) -> Result<&'a Map<String, Value>> {
        json.as_object().ok_or_else(|| Error {
            code: StatusCode::UNPROCESSABLE_ENTITY,
            msg: format!(
                "Invalid {}: expected a JSON object, got {}",
                self.shape,
                json_type(json)
            ),
        })
    }

    fn required<'a>(&mut self, object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
        let value = object.get(name);
        if value.is_none() {
            self.problems.push(format!("field `{}` is required", name));
        }
        value
    }

    fn mistyped(&mut self, name: &str, expected: &str, value: &Value) {
        self.problems.push(format!(
            "field `{}` must be {}, got {}",
            name,
            expected,
            json_type(value)
        ));
    }

    fn required_string(&mut self, object: &Map<String, Value>, name: &str) -> Option<String> {
        match self.required(object, name)? {
            Value::String(s) => Some(s.clone()),
            other => {
                self.mistyped(name, "a string", other);
                None
            }
        }
    }

    fn required_integer(&mut self, object: &Map<String, Value>, name: &str) -> Option<i64> {
        let value = self.required(object, name)?;
        match value.as_i64() {
            Some(i) => Some(i),
            None => {
                self.mistyped(name, "a 64-bit integer", value);
                None
            }
        }
    }

    fn required_datetime(
        &mut self,
        object: &Map<String, Value>,
        name: &str,
    ) -> Option<DateTime<Utc>> {
        match self.required(object, name)? {
            Value::String(s) => {
                let parsed = parse_datetime(s);
                if parsed.is_none() {
                    self.problems.push(format!(
                        "field `{}` is not a valid datetime: {:?}",
                        name, s
                    ));
                }
                parsed
            }
            other => {
                self.mistyped(name, "a datetime string", other);
                None
            }
        }
    }

    fn query_integer(&mut self, params: &HashMap<String, String>, name: &str) -> Option<i64> {
        let text = query_string(params, name)?;
        match text.trim().parse() {
            Ok(i) => Some(i),
            Err(_) => {
                self.problems
                    .push(format!("parameter `{}` is not a valid integer: {:?}", name, text));
                None
            }
        }
    }

    fn query_datetime(
        &mut self,
        params: &HashMap<String, String>,
        name: &str,
    ) -> Option<DateTime<Utc>> {
        let text = query_string(params, name)?;
        let parsed = parse_datetime(&text);
        if parsed.is_none() {
            self.problems
                .push(format!("parameter `{}` is not a valid datetime: {:?}", name, text));
        }
        parsed
    }
}

/// Query parameter value, with empty values counting as absent.
fn query_string(params: &HashMap<String, String>, name: &str) -> Option<String> {
    params.get(name).filter(|v| !v.is_empty()).cloned()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Timestamps on the wire: RFC 3339 with millisecond precision.
fn serialize_timestamp<S: Serializer>(
    dt: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_datetime(dt))
}
