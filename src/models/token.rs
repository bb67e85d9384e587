use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rfc3339_millis;
use crate::errors::AppError;

/// A generated token as returned to clients. `id` is the short (unpadded) form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub body: TokenBody,
}

/// Stored token document. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBody {
    #[serde(with = "rfc3339_millis")]
    pub generated: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub svg: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "png")]
    pub original_png: Option<Vec<u8>>,
}

mod png {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) => STANDARD.decode(s).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

/// `put_token` request body. Every field is optional at the wire level so
/// missing attributes produce a validation error instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewToken {
    pub svg: Option<String>,
    pub generated: Option<String>,
    pub keywords: Option<Vec<String>>,
    /// Base64-encoded PNG.
    pub original_png: Option<String>,
}

impl NewToken {
    pub fn validate(self) -> Result<TokenBody, AppError> {
        let (svg, generated, keywords) = match (self.svg, self.generated, self.keywords) {
            (Some(svg), Some(generated), Some(keywords))
                if !svg.trim().is_empty()
                    && !generated.trim().is_empty()
                    && !keywords.is_empty() =>
            {
                (svg, generated, keywords)
            }
            _ => return Err(AppError::validation("required attribute(s) missing")),
        };

        let generated = super::parse_timestamp(generated.trim())
            .map_err(|_| AppError::validation("invalid timestamp"))?;

        let original_png = self
            .original_png
            .map(|png| STANDARD.decode(png.trim()))
            .transpose()
            .map_err(|_| AppError::validation("original_png is not valid base64"))?;

        Ok(TokenBody {
            generated,
            keywords,
            svg,
            original_png,
        })
    }
}

/// One window over the token collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub total_rows: usize,
    pub offset: i64,
    pub rows: Vec<Token>,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub newest_first: bool,
}
