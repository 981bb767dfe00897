use serde::{Deserialize, Serialize};

use crate::Value;

/// The declared type of a packet field.
///
/// Field types drive the default codec. They are also what a schema export
/// lists, so they serialize to a stable tagged form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum FieldType {
    /// Signed 64 bit integer
    Integer,
    /// 64 bit IEEE-754 float
    Float,
    /// true or false
    Boolean,
    /// UTF-8 string
    String,
    /// Either `Value::Null` or a value of the inner type
    Optional(Box<FieldType>),
    /// A value of any one of the alternatives. The first alternative that
    /// accepts a value is the one it is encoded as.
    Union(Vec<FieldType>),
    /// Any number of values of the inner type
    List(Box<FieldType>),
}

impl FieldType {
    /// `Optional(inner)`
    pub fn optional(inner: FieldType) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// `List(inner)`
    pub fn list(inner: FieldType) -> Self {
        Self::List(Box::new(inner))
    }

    /// `Union(alternatives)`
    pub fn union(alternatives: impl IntoIterator<Item = FieldType>) -> Self {
        Self::Union(alternatives.into_iter().collect())
    }

    /// Whether `value` conforms to this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Integer, Value::Integer(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Boolean, Value::Boolean(_)) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Optional(_), Value::Null) => true,
            (FieldType::Optional(inner), value) => inner.accepts(value),
            (FieldType::Union(alternatives), value) => {
                alternatives.iter().any(|alternative| alternative.accepts(value))
            }
            (FieldType::List(inner), Value::List(values)) => {
                values.iter().all(|value| inner.accepts(value))
            }
            _ => false,
        }
    }

    /// Index of the union alternative a value is encoded as.
    pub fn union_alternative(alternatives: &[FieldType], value: &Value) -> Option<usize> {
        alternatives
            .iter()
            .position(|alternative| alternative.accepts(value))
    }

    /// Whether a packet may omit this field at construction.
    pub fn is_optional(&self) -> bool {
        self.accepts(&Value::Null)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            FieldType::Integer | FieldType::Float | FieldType::Boolean | FieldType::String => {
                Ok(())
            }
            FieldType::Optional(inner) | FieldType::List(inner) => inner.validate(),
            FieldType::Union(alternatives) => {
                if alternatives.is_empty() {
                    return Err("a union needs at least one alternative".to_string());
                }
                if u8::MAX as usize + 1 < alternatives.len() {
                    return Err(format!(
                        "a union supports at most 256 alternatives, got {}",
                        alternatives.len()
                    ));
                }
                alternatives.iter().try_for_each(FieldType::validate)
            }
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Integer => write!(f, "integer"),
            FieldType::Float => write!(f, "float"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::String => write!(f, "string"),
            FieldType::Optional(inner) => write!(f, "optional<{inner}>"),
            FieldType::Union(alternatives) => {
                write!(f, "union<")?;
                for (i, alternative) in alternatives.iter().enumerate() {
                    if 0 < i {
                        write!(f, ", ")?;
                    }
                    write!(f, "{alternative}")?;
                }
                write!(f, ">")
            }
            FieldType::List(inner) => write!(f, "list<{inner}>"),
        }
    }
}

/// A named, typed field of a packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, unique within its packet type
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
}

impl FieldSpec {
    /// Declare a field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[cfg(test)]
mod test {
    use super::FieldType;
    use crate::Value;

    #[test]
    fn optional_accepts_null_and_inner() {
        let field_type = FieldType::optional(FieldType::Integer);
        assert!(field_type.accepts(&Value::Null));
        assert!(field_type.accepts(&Value::Integer(3)));
        assert!(!field_type.accepts(&Value::from("3")));
        assert!(field_type.is_optional());
        assert!(!FieldType::Integer.is_optional());
    }

    #[test]
    fn union_picks_first_accepting_alternative() {
        let alternatives = vec![
            FieldType::String,
            FieldType::optional(FieldType::Integer),
            FieldType::Integer,
        ];
        assert_eq!(
            Some(1),
            FieldType::union_alternative(&alternatives, &Value::Integer(4))
        );
        assert_eq!(
            Some(0),
            FieldType::union_alternative(&alternatives, &Value::from("x"))
        );
        assert_eq!(
            None,
            FieldType::union_alternative(&alternatives, &Value::Boolean(true))
        );
    }

    #[test]
    fn list_requires_every_element() {
        let field_type = FieldType::list(FieldType::Float);
        assert!(field_type.accepts(&Value::List(vec![])));
        assert!(field_type.accepts(&Value::from(vec![1.5, 2.0])));
        assert!(!field_type.accepts(&Value::List(vec![Value::Float(1.0), Value::Integer(1)])));
    }

    #[test]
    fn empty_union_is_rejected() {
        assert!(FieldType::Union(vec![]).validate().is_err());
        assert!(FieldType::list(FieldType::Union(vec![])).validate().is_err());
        assert!(FieldType::union([FieldType::Boolean]).validate().is_ok());
    }

    #[test]
    fn display_is_readable() {
        let field_type = FieldType::list(FieldType::union([
            FieldType::Integer,
            FieldType::optional(FieldType::String),
        ]));
        assert_eq!("list<union<integer, optional<string>>>", field_type.to_string());
    }
}
