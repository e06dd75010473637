// ============================================================================
// Record Mapping
// ============================================================================
//
// Typed records cross the store boundary as flat string attributes. A record
// type names its domain and item identity, and may designate one version
// attribute used for optimistic concurrency.
//
// ============================================================================

use crate::core::{Attributes, DbError, Result};
use crate::version::{VersionAttribute, VersionValue};
use std::str::FromStr;

/// A typed record stored as one item.
pub trait Record: Send + Sync + Sized {
    /// Domain holding every record of this type.
    fn domain() -> &'static str;

    /// Item identity within the domain.
    fn item_name(&self) -> String;

    /// Attributes to store, excluding the version attribute.
    fn to_attributes(&self) -> Attributes;

    fn from_attributes(item_name: &str, attributes: &Attributes) -> Result<Self>;

    /// The designated version attribute, if this type is versioned.
    fn version_attribute() -> Option<VersionAttribute> {
        None
    }

    /// Last version observed for this record; `None` if never stored.
    fn version(&self) -> Option<VersionValue> {
        None
    }

    fn set_version(&mut self, _version: VersionValue) {}
}

/// Reads a required attribute.
pub fn required<'a>(attributes: &'a Attributes, name: &str) -> Result<&'a str> {
    attributes
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DbError::CodecError(format!("missing attribute '{}'", name)))
}

/// Reads and parses a required attribute.
pub fn parse_required<T>(attributes: &Attributes, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = required(attributes, name)?;
    raw.parse::<T>()
        .map_err(|err| DbError::CodecError(format!("attribute '{}' = '{}': {}", name, raw, err)))
}

/// Reads the record's version attribute back, if the type has one and the
/// item carries it.
pub fn read_version<R: Record>(attributes: &Attributes) -> Result<Option<VersionValue>> {
    let Some(attribute) = R::version_attribute() else {
        return Ok(None);
    };
    attributes
        .get(&attribute.name)
        .map(|raw| VersionValue::parse(attribute.kind, raw))
        .transpose()
}

/// Decodes a stored item, restoring its version.
pub fn decode_record<R: Record>(item_name: &str, attributes: &Attributes) -> Result<R> {
    let mut record = R::from_attributes(item_name, attributes)?;
    if let Some(version) = read_version::<R>(attributes)? {
        record.set_version(version);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person {
        id: u32,
        age: u8,
        version: Option<VersionValue>,
    }

    impl Record for Person {
        fn domain() -> &'static str {
            "Person"
        }

        fn item_name(&self) -> String {
            self.id.to_string()
        }

        fn to_attributes(&self) -> Attributes {
            Attributes::from([("age".to_string(), format!("{:03}", self.age))])
        }

        fn from_attributes(item_name: &str, attributes: &Attributes) -> Result<Self> {
            Ok(Self {
                id: item_name
                    .parse()
                    .map_err(|_| DbError::CodecError(format!("bad id '{}'", item_name)))?,
                age: parse_required(attributes, "age")?,
                version: None,
            })
        }

        fn version_attribute() -> Option<VersionAttribute> {
            Some(VersionAttribute::counter("Version"))
        }

        fn version(&self) -> Option<VersionValue> {
            self.version
        }

        fn set_version(&mut self, version: VersionValue) {
            self.version = Some(version);
        }
    }

    #[test]
    fn decode_restores_version() {
        let attributes = Attributes::from([
            ("age".to_string(), "042".to_string()),
            ("Version".to_string(), "7".to_string()),
        ]);
        let person = decode_record::<Person>("12", &attributes).unwrap();
        assert_eq!(person.id, 12);
        assert_eq!(person.age, 42);
        assert_eq!(person.version, Some(VersionValue::Counter(7)));
    }

    #[test]
    fn missing_attribute_is_codec_error() {
        let err = decode_record::<Person>("12", &Attributes::new()).err().unwrap();
        assert!(matches!(err, DbError::CodecError(_)));
    }
}
