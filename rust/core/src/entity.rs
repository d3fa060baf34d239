// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Owned attribute values and decoded STEP instances

use smallvec::SmallVec;

use crate::parser::{RawInstance, Token};

/// STEP attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    EntityRef(u32),
    String(String),
    Integer(i64),
    Float(f64),
    /// Enum value without the surrounding dots
    Enum(String),
    List(Vec<AttributeValue>),
    /// Typed value such as `LENGTH_MEASURE(25.4)`
    Typed(String, Vec<AttributeValue>),
    Null,
    Derived,
}

impl AttributeValue {
    pub fn from_token(token: &Token) -> Self {
        match token {
            Token::EntityRef(id) => AttributeValue::EntityRef(*id),
            Token::String(s) => AttributeValue::String(s.replace("''", "'")),
            Token::Integer(i) => AttributeValue::Integer(*i),
            Token::Float(f) => AttributeValue::Float(*f),
            Token::Enum(e) => AttributeValue::Enum(e.to_string()),
            Token::List(items) => {
                AttributeValue::List(items.iter().map(Self::from_token).collect())
            }
            Token::TypedValue(name, args) => AttributeValue::Typed(
                name.to_ascii_uppercase(),
                args.iter().map(Self::from_token).collect(),
            ),
            Token::Null => AttributeValue::Null,
            Token::Derived => AttributeValue::Derived,
        }
    }

    #[inline]
    pub fn as_entity_ref(&self) -> Option<u32> {
        match self {
            AttributeValue::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_enum(&self) -> Option<&str> {
        match self {
            AttributeValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean/logical enum: `.T.` / `.F.`; `.U.` yields `None`
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_enum()? {
            "T" | "TRUE" => Some(true),
            "F" | "FALSE" => Some(false),
            _ => None,
        }
    }

    /// Numeric value; looks through typed wrappers like `LENGTH_MEASURE(1.)`
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Typed(_, args) if args.len() == 1 => args[0].as_float(),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null | AttributeValue::Derived)
    }

    /// Parse a coordinate triple `(x, y, z)`; 2D tuples get z = 0
    pub fn as_coords(&self) -> Option<[f64; 3]> {
        let list = self.as_list()?;
        let x = list.first()?.as_float()?;
        let y = list.get(1)?.as_float()?;
        let z = match list.get(2) {
            Some(v) => v.as_float()?,
            None => 0.0,
        };
        Some([x, y, z])
    }

    /// Entity references of a list attribute, skipping anything else
    pub fn ref_list(&self) -> Vec<u32> {
        self.as_list()
            .map(|items| items.iter().filter_map(|v| v.as_entity_ref()).collect())
            .unwrap_or_default()
    }
}

/// One named record of a decoded instance
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Upper-case entity type name
    pub type_name: String,
    pub attributes: Vec<AttributeValue>,
}

/// Decoded STEP instance
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEntity {
    pub id: u32,
    pub records: SmallVec<[EntityRecord; 1]>,
}

impl DecodedEntity {
    pub fn from_raw(raw: &RawInstance) -> Self {
        let records = raw
            .records
            .iter()
            .map(|r| EntityRecord {
                type_name: r.type_name.to_ascii_uppercase(),
                attributes: r.args.iter().map(AttributeValue::from_token).collect(),
            })
            .collect();
        Self { id: raw.id, records }
    }

    /// Type name of a simple instance, or of the first record of a complex one
    pub fn type_name(&self) -> &str {
        self.records
            .first()
            .map(|r| r.type_name.as_str())
            .unwrap_or("")
    }

    pub fn is_complex(&self) -> bool {
        self.records.len() > 1
    }

    /// Whether any record carries the given (upper-case) type name
    pub fn has_type(&self, type_name: &str) -> bool {
        self.records.iter().any(|r| r.type_name == type_name)
    }

    pub fn record(&self, type_name: &str) -> Option<&EntityRecord> {
        self.records.iter().find(|r| r.type_name == type_name)
    }

    /// Attribute of the first record
    #[inline]
    pub fn get(&self, index: usize) -> Option<&AttributeValue> {
        self.records.first()?.attributes.get(index)
    }

    #[inline]
    pub fn get_ref(&self, index: usize) -> Option<u32> {
        self.get(index)?.as_entity_ref()
    }

    #[inline]
    pub fn get_float(&self, index: usize) -> Option<f64> {
        self.get(index)?.as_float()
    }

    #[inline]
    pub fn get_list(&self, index: usize) -> Option<&[AttributeValue]> {
        self.get(index)?.as_list()
    }

    #[inline]
    pub fn get_bool(&self, index: usize) -> Option<bool> {
        self.get(index)?.as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_entity;

    #[test]
    fn test_decoded_simple_entity() {
        let raw = parse_entity("#3=CIRCLE('it''s',#4,LENGTH_MEASURE(5.));").unwrap();
        let entity = DecodedEntity::from_raw(&raw);
        assert_eq!(entity.type_name(), "CIRCLE");
        assert_eq!(entity.get(0).and_then(|v| v.as_string()), Some("it's"));
        assert_eq!(entity.get_ref(1), Some(4));
        assert_eq!(entity.get_float(2), Some(5.0));
    }

    #[test]
    fn test_decoded_complex_entity() {
        let raw = parse_entity("#7=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT($,.METRE.));").unwrap();
        let entity = DecodedEntity::from_raw(&raw);
        assert!(entity.is_complex());
        assert!(entity.has_type("SI_UNIT"));
        assert!(!entity.has_type("PLANE"));
        let si = entity.record("SI_UNIT").unwrap();
        assert!(si.attributes[0].is_null());
        assert_eq!(si.attributes[1].as_enum(), Some("METRE"));
    }

    #[test]
    fn test_coords_and_bools() {
        let raw = parse_entity("#1=X((1.,2.),(1.,2.,3.),.T.,(#5,$,#6));").unwrap();
        let entity = DecodedEntity::from_raw(&raw);
        assert_eq!(entity.get(0).and_then(|v| v.as_coords()), Some([1.0, 2.0, 0.0]));
        assert_eq!(entity.get(1).and_then(|v| v.as_coords()), Some([1.0, 2.0, 3.0]));
        assert_eq!(entity.get_bool(2), Some(true));
        assert_eq!(entity.get(3).map(|v| v.ref_list()), Some(vec![5, 6]));
    }
}
