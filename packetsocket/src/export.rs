//! Schema documents list packet types so that independently built peers can
//! agree on aliases, groups and field layouts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{FieldSpec, PacketDescriptor};

/// Which packet types a schema export includes.
#[derive(Debug, Clone, Default)]
pub enum SchemaSelector {
    /// Every dumpable type
    #[default]
    All,
    /// Dumpable types in these groups
    Groups(HashSet<String>),
    /// Dumpable types with these aliases
    Aliases(HashSet<String>),
}

impl SchemaSelector {
    /// True when `descriptor` matches. Dumpability is checked by the registry.
    pub fn selects(&self, descriptor: &PacketDescriptor) -> bool {
        match self {
            SchemaSelector::All => true,
            SchemaSelector::Groups(groups) => groups.contains(descriptor.group()),
            SchemaSelector::Aliases(aliases) => aliases.contains(descriptor.alias()),
        }
    }
}

/// The exported wire-relevant part of one packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketSchema {
    /// Alias of the type
    pub alias: String,
    /// Group of the type
    pub group: String,
    /// Fields in wire order
    pub fields: Vec<FieldSpec>,
}

impl PacketSchema {
    /// A default-codec descriptor with this schema, ready to register.
    pub fn to_descriptor(&self) -> crate::Result<PacketDescriptor> {
        self.fields
            .iter()
            .fold(
                PacketDescriptor::builder(&self.alias).group(&self.group),
                |builder, field| builder.field(&field.name, field.field_type.clone()),
            )
            .build()
    }
}

/// A listing of packet types, sorted by alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// One entry per exported type
    pub packets: Vec<PacketSchema>,
}

impl SchemaDocument {
    /// List the given types, sorted by alias.
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a PacketDescriptor>) -> Self {
        let mut packets: Vec<PacketSchema> = descriptors
            .into_iter()
            .map(|descriptor| PacketSchema {
                alias: descriptor.alias().to_string(),
                group: descriptor.group().to_string(),
                fields: descriptor.fields().to_vec(),
            })
            .collect();
        packets.sort_by(|a, b| a.alias.cmp(&b.alias));
        Self { packets }
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document produced by [`SchemaDocument::to_json`].
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod test {
    use super::SchemaDocument;
    use crate::{FieldType, PacketDescriptor};

    #[test]
    fn json_layout_is_stable() {
        let descriptor = PacketDescriptor::builder("p")
            .group("g")
            .field("seq", FieldType::Integer)
            .field("tags", FieldType::list(FieldType::String))
            .build()
            .expect("valid descriptor");
        let json = SchemaDocument::from_descriptors([&descriptor])
            .to_json()
            .expect("renders");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(
            serde_json::json!({
                "packets": [{
                    "alias": "p",
                    "group": "g",
                    "fields": [
                        { "name": "seq", "field_type": { "type": "integer" } },
                        { "name": "tags", "field_type": { "type": "list", "of": { "type": "string" } } },
                    ]
                }]
            }),
            value
        );
    }
}
