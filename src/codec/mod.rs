//! Discriminated unions
//!
//! Many resource-manager payloads are open sum types: a field such as `type`,
//! `computeType` or `certificateSource` picks the concrete shape of the rest of
//! the object. This module decodes such envelopes into a Rust enum with one arm
//! per known shape plus a `Raw` arm for shapes this client does not know yet.
//!
//! # Architecture
//!
//! - [`Union`] - implemented for each union type, usually by [`discriminated_union!`](crate::discriminated_union)
//! - [`decode`] / [`decode_value`] - envelope to union, `Ok(None)` when the discriminator is absent
//! - [`encode`] / [`encode_value`] - union to envelope, writing the arm's literal tag
//! - [`RawVariant`] - an unrecognised envelope kept verbatim
//! - [`open_enum!`](crate::open_enum) - case-insensitive string enums that keep unknown values
//!
//! # Example
//!
//! ```ignore
//! armrt::discriminated_union! {
//!     pub enum CertificateSource: "certificateSource" {
//!         "Cdn" => Cdn(CdnCertificate),
//!         "AzureKeyVault" => KeyVault(KeyVaultCertificate),
//!     }
//! }
//!
//! let source: Option<CertificateSource> = armrt::codec::decode(br#"{"certificateSource":"cdn"}"#)?;
//! ```

mod macros;

use crate::error::DecodeError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A discriminated union
///
/// Arms are tried in the order of [`Union::TAGS`]; the first tag equal to the
/// envelope's discriminator (ignoring ASCII case) wins.
pub trait Union: Sized {
    /// Type name reported in decode errors
    const TYPE_NAME: &'static str;
    /// Wire field holding the variant tag
    const DISCRIMINATOR: &'static str;
    /// Known tags, in match priority order
    const TAGS: &'static [&'static str];

    /// Decode the whole envelope as the arm registered under `tag`
    /// (`tag` is always one of [`Union::TAGS`])
    fn decode_variant(tag: &'static str, envelope: Value) -> Result<Self, serde_json::Error>;

    /// Wrap an envelope no arm matched
    fn from_raw(raw: RawVariant) -> Self;

    /// The arm's own fields, or the raw envelope
    fn encode_variant(&self) -> Result<Encoded<'_>, serde_json::Error>;
}

/// Output of [`Union::encode_variant`]
#[derive(Debug)]
pub enum Encoded<'a> {
    /// A known arm: its literal tag and its serialized fields
    Known { tag: &'static str, fields: Value },
    /// An unknown arm, re-emitted verbatim
    Raw(&'a RawVariant),
}

/// An envelope whose discriminator matched no known arm
///
/// `fields` holds the complete original object, discriminator included, so
/// that re-encoding it hands the server back exactly what it sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVariant {
    pub tag: String,
    pub fields: Map<String, Value>,
}

impl RawVariant {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Read the discriminator as a string. Absent or `null` is `None`; other
/// scalars compare by their JSON text.
fn discriminator_value(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode an already-parsed envelope
///
/// Returns `Ok(None)` for `null` or when the discriminator field is absent,
/// and a [`RawVariant`] arm when the tag is unknown.
pub fn decode_value<U: Union>(envelope: Value) -> Result<Option<U>, DecodeError> {
    let fields = match envelope {
        Value::Null => return Ok(None),
        Value::Object(fields) => fields,
        other => {
            return Err(DecodeError::custom(
                U::TYPE_NAME,
                "$",
                format!("expected an object, found {}", type_label(&other)),
            ))
        }
    };

    let Some(tag) = discriminator_value(&fields, U::DISCRIMINATOR) else {
        return Ok(None);
    };

    match U::TAGS.iter().copied().find(|known| known.eq_ignore_ascii_case(&tag)) {
        Some(known) => U::decode_variant(known, Value::Object(fields))
            .map(Some)
            .map_err(|e| DecodeError::new(U::TYPE_NAME, "$", e)),
        None => {
            tracing::debug!(
                "{}: unknown {} `{}`, keeping raw payload",
                U::TYPE_NAME,
                U::DISCRIMINATOR,
                tag
            );
            Ok(Some(U::from_raw(RawVariant { tag, fields })))
        }
    }
}

/// Decode raw JSON bytes. Empty input is `Ok(None)`.
pub fn decode<U: Union>(raw: &[u8]) -> Result<Option<U>, DecodeError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let envelope: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::new(U::TYPE_NAME, "$", e))?;
    decode_value(envelope)
}

/// Decode a JSON array of unions
///
/// Each element must carry a discriminator; a missing one is reported with
/// the element's index. `null` decodes as an empty list.
pub fn decode_list<U: Union>(envelope: Value) -> Result<Vec<U>, DecodeError> {
    let items = match envelope {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(DecodeError::custom(
                U::TYPE_NAME,
                "$",
                format!("expected an array, found {}", type_label(&other)),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let prefix = format!("$[{}]", index);
            decode_value::<U>(item)
                .map_err(|e| e.nested(&prefix))?
                .ok_or_else(|| {
                    DecodeError::custom(
                        U::TYPE_NAME,
                        prefix.clone(),
                        format!("missing discriminator `{}`", U::DISCRIMINATOR),
                    )
                })
        })
        .collect()
}

/// Encode a union into its wire envelope
pub fn encode_value<U: Union>(union: &U) -> Result<Value, DecodeError> {
    let encoded = union
        .encode_variant()
        .map_err(|e| DecodeError::new(U::TYPE_NAME, "$", e))?;

    match encoded {
        Encoded::Raw(raw) => Ok(Value::Object(raw.fields.clone())),
        Encoded::Known { tag, fields } => {
            let mut map = match fields {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    return Err(DecodeError::custom(
                        U::TYPE_NAME,
                        "$",
                        format!("variant `{}` serialized to {}", tag, type_label(&other)),
                    ))
                }
            };
            map.insert(U::DISCRIMINATOR.to_string(), Value::String(tag.to_string()));
            Ok(Value::Object(map))
        }
    }
}

/// Encode a union to JSON bytes
pub fn encode<U: Union>(union: &U) -> Result<Vec<u8>, DecodeError> {
    let value = encode_value(union)?;
    serde_json::to_vec(&value).map_err(|e| DecodeError::new(U::TYPE_NAME, "$", e))
}

/// `Serialize` body shared by generated unions
pub fn serialize<U: Union, S: Serializer>(union: &U, serializer: S) -> Result<S::Ok, S::Error> {
    encode_value(union)
        .map_err(serde::ser::Error::custom)?
        .serialize(serializer)
}

/// `Deserialize` body shared by generated unions
///
/// A bare union value must carry its discriminator. Use [`optional`] for
/// fields where an envelope without one means "not set".
pub fn deserialize<'de, U: Union, D: Deserializer<'de>>(deserializer: D) -> Result<U, D::Error> {
    let envelope = Value::deserialize(deserializer)?;
    decode_value::<U>(envelope)
        .map_err(D::Error::custom)?
        .ok_or_else(|| {
            D::Error::custom(format!(
                "{} is missing its `{}` discriminator",
                U::TYPE_NAME,
                U::DISCRIMINATOR
            ))
        })
}

/// Serde adapter for `Option<U>` fields
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct HttpsSettings {
///     #[serde(default, skip_serializing_if = "Option::is_none", with = "armrt::codec::optional")]
///     certificate: Option<CertificateSource>,
/// }
/// ```
pub mod optional {
    use super::{decode_value, encode_value, Union};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<U: Union, S: Serializer>(
        union: &Option<U>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match union {
            Some(union) => encode_value(union)
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, U: Union, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            Some(envelope) => decode_value(envelope).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
