pub mod interaction;
pub mod token;

pub use interaction::{
    Interaction, InteractionStatus, InteractionTicket, InteractionUpdate, NewInteractionUpdate,
};
pub use token::{NewToken, Page, Token, TokenBody};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::store::StoreError;

/// Current time truncated to the millisecond, the precision timestamps are stored at.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// RFC 3339, UTC, millisecond precision: `2021-04-09T15:26:14.054Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
}

/// Lower bound for time filters. Besides RFC 3339 this takes a timestamp
/// without offset (read as UTC) or a bare date (midnight UTC).
pub fn parse_since(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let s = s.trim();
    parse_timestamp(s)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|ts| ts.and_utc()))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        })
}

/// Serde adapter for [`format_timestamp`] / [`parse_timestamp`].
pub mod rfc3339_millis {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_timestamp(&s).map_err(de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(s) => crate::models::parse_timestamp(&s)
                    .map(Some)
                    .map_err(de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// Serialize a model into a store document. The id is the document key and
/// is not repeated in the body.
pub(crate) fn to_doc<T: Serialize>(model: &T) -> Result<Value, StoreError> {
    let mut doc = serde_json::to_value(model).map_err(|e| StoreError::Malformed(e.to_string()))?;
    if let Some(map) = doc.as_object_mut() {
        map.remove("id");
    }
    Ok(doc)
}

/// Inverse of [`to_doc`].
pub(crate) fn from_doc<T: DeserializeOwned>(id: &str, mut doc: Value) -> Result<T, StoreError> {
    if let Some(map) = doc.as_object_mut() {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    serde_json::from_value(doc)
        .map_err(|e| StoreError::Malformed(format!("document {}: {}", id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_have_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2021, 4, 9, 15, 26, 14).unwrap()
            + chrono::Duration::microseconds(54_321);
        assert_eq!(format_timestamp(&ts), "2021-04-09T15:26:14.054Z");
        assert_eq!(
            parse_timestamp("2021-04-09T17:26:14.054+02:00").unwrap(),
            parse_timestamp("2021-04-09T15:26:14.054Z").unwrap()
        );
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2021-05-01").is_err());
    }

    #[test]
    fn test_parse_since_accepts_dates() {
        assert_eq!(
            parse_since("2021-05-01").unwrap(),
            parse_timestamp("2021-05-01T00:00:00.000Z").unwrap()
        );
        assert_eq!(
            parse_since("2021-05-01T10:30:00").unwrap(),
            parse_timestamp("2021-05-01T10:30:00Z").unwrap()
        );
        assert_eq!(
            parse_since("2021-05-01T12:30:00.000+02:00").unwrap(),
            parse_timestamp("2021-05-01T10:30:00Z").unwrap()
        );
        assert!(parse_since("xyz").is_err());
    }

    #[test]
    fn test_now_is_truncated() {
        assert_eq!(now().timestamp_subsec_micros() % 1000, 0);
    }
}
