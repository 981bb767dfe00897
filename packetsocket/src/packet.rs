use std::sync::Arc;

use crate::{PacketDescriptor, Value};

/// An instance of a packet type: its descriptor plus a value for every field.
///
/// Values always conform to the descriptor's field specs. Packets built with
/// [`Packet::builder`] are checked at construction; decoded packets are checked
/// by the codec.
#[derive(Clone)]
pub struct Packet {
    descriptor: Arc<PacketDescriptor>,
    values: Vec<Value>,
    request_token: Option<u64>,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct(self.descriptor.alias());
        for (field, value) in self.descriptor.fields().iter().zip(&self.values) {
            debug.field(&field.name, value);
        }
        if let Some(token) = self.request_token {
            debug.field("request_token", &token);
        }
        debug.finish()
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.alias() == other.alias() && self.values == other.values
    }
}

impl Packet {
    /// Start a packet of the given type. Unset fields that are optional become
    /// `Value::Null`; `build` rejects any other unset field.
    pub fn builder(descriptor: &Arc<PacketDescriptor>) -> PacketBuilder {
        PacketBuilder {
            descriptor: descriptor.clone(),
            values: vec![None; descriptor.fields().len()],
            error: None,
        }
    }

    /// Build a packet from values in field declaration order.
    pub fn from_values(
        descriptor: &Arc<PacketDescriptor>,
        values: Vec<Value>,
    ) -> crate::Result<Self> {
        let packet = Self {
            descriptor: descriptor.clone(),
            values,
            request_token: None,
        };
        packet
            .check_conformance()
            .map_err(crate::Error::InvalidPacket)?;
        Ok(packet)
    }

    /// For the codec, which only produces conforming values.
    pub(crate) fn from_decoded(descriptor: Arc<PacketDescriptor>, values: Vec<Value>) -> Self {
        Self {
            descriptor,
            values,
            request_token: None,
        }
    }

    /// The packet's type.
    pub fn descriptor(&self) -> &Arc<PacketDescriptor> {
        &self.descriptor
    }

    /// Alias of the packet's type.
    pub fn alias(&self) -> &str {
        self.descriptor.alias()
    }

    /// Group of the packet's type.
    pub fn group(&self) -> &str {
        self.descriptor.group()
    }

    /// Look up a value by field name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.descriptor
            .field_index(name)
            .and_then(|index| self.values.get(index))
    }

    /// Values in field declaration order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The correlation token this packet arrived with, when the peer sent it as
    /// a request. Only such packets can be responded to.
    pub fn request_token(&self) -> Option<u64> {
        self.request_token
    }

    pub(crate) fn set_request_token(&mut self, token: Option<u64>) {
        self.request_token = token;
    }

    pub(crate) fn check_conformance(&self) -> Result<(), String> {
        let fields = self.descriptor.fields();
        if fields.len() != self.values.len() {
            return Err(format!(
                "{} has {} fields, got {} values",
                self.alias(),
                fields.len(),
                self.values.len()
            ));
        }
        for (field, value) in fields.iter().zip(&self.values) {
            if !field.field_type.accepts(value) {
                return Err(format!(
                    "{}.{} is declared {}, got {}",
                    self.alias(),
                    field.name,
                    field.field_type,
                    value.kind()
                ));
            }
        }
        Ok(())
    }
}

/// Builds a [`Packet`] by field name.
#[derive(Debug)]
pub struct PacketBuilder {
    descriptor: Arc<PacketDescriptor>,
    values: Vec<Option<Value>>,
    error: Option<String>,
}

impl PacketBuilder {
    /// Set a field. Unknown names and mismatched values are reported by `build`.
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        match self.descriptor.field_index(name) {
            Some(index) => self.values[index] = Some(value.into()),
            None => {
                if self.error.is_none() {
                    self.error = Some(format!(
                        "{} got an unexpected field {name:?}",
                        self.descriptor.alias()
                    ));
                }
            }
        }
        self
    }

    /// Omitted optional fields are `Value::Null`; omitted required fields are an error.
    pub fn build(self) -> crate::Result<Packet> {
        if let Some(error) = self.error {
            return Err(crate::Error::InvalidPacket(error));
        }
        let mut values = Vec::with_capacity(self.values.len());
        for (field, value) in self.descriptor.fields().iter().zip(self.values) {
            match value {
                Some(value) => values.push(value),
                None if field.field_type.is_optional() => values.push(Value::Null),
                None => {
                    return Err(crate::Error::InvalidPacket(format!(
                        "{} is missing required field {:?} of type {}",
                        self.descriptor.alias(),
                        field.name,
                        field.field_type
                    )))
                }
            }
        }
        Packet::from_values(&self.descriptor, values)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::Packet;
    use crate::{Error, FieldType, PacketDescriptor, Value};

    fn descriptor() -> Arc<PacketDescriptor> {
        Arc::new(
            PacketDescriptor::builder("user")
                .field("name", FieldType::String)
                .field("age", FieldType::optional(FieldType::Integer))
                .build()
                .expect("valid descriptor"),
        )
    }

    #[test]
    fn optional_fields_default_to_null() {
        let packet = Packet::builder(&descriptor())
            .set("name", "ada")
            .build()
            .expect("valid packet");
        assert_eq!(Some(&Value::from("ada")), packet.get("name"));
        assert_eq!(Some(&Value::Null), packet.get("age"));
        assert_eq!(None, packet.request_token());
    }

    #[test]
    fn missing_required_field() {
        let result = Packet::builder(&descriptor()).set("age", 3).build();
        assert!(matches!(result, Err(Error::InvalidPacket(_))), "{result:?}");
    }

    #[test]
    fn unexpected_field() {
        let result = Packet::builder(&descriptor())
            .set("name", "ada")
            .set("height", 3)
            .build();
        assert!(matches!(result, Err(Error::InvalidPacket(_))), "{result:?}");
    }

    #[test]
    fn wrong_type() {
        let result = Packet::builder(&descriptor()).set("name", 3).build();
        assert!(matches!(result, Err(Error::InvalidPacket(_))), "{result:?}");
        let result = Packet::from_values(&descriptor(), vec![Value::from("ada")]);
        assert!(matches!(result, Err(Error::InvalidPacket(_))), "{result:?}");
    }
}
