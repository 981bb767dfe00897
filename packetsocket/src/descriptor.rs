use std::{collections::HashSet, future::Future, sync::Arc};

use crate::{DispatchContext, FieldSpec, FieldType, Packet, PacketReceiver};

/// The group every connection accepts, regardless of its group filter.
pub const WILDCARD_GROUP: &str = "*";

/// Longest alias or group, in bytes. Both are 1-byte length prefixed on the wire.
pub const MAX_NAME_LENGTH: usize = u8::MAX as usize;

/// A packet type's own wire encoding, used instead of the schema-driven codec.
pub type EncodeOverride = Arc<dyn Fn(&Packet) -> crate::Result<Vec<u8>> + Send + Sync>;

/// A packet type's own wire decoding, used instead of the schema-driven codec.
pub type DecodeOverride =
    Arc<dyn Fn(&Arc<PacketDescriptor>, &[u8]) -> crate::Result<Packet> + Send + Sync>;

/// The registered schema and behavior of one packet type.
///
/// Descriptors are immutable once built. Register them in a [`crate::PacketRegistry`]
/// to make them visible to connections and to schema export.
pub struct PacketDescriptor {
    alias: String,
    group: String,
    fields: Vec<FieldSpec>,
    dumpable: bool,
    encoder: Option<EncodeOverride>,
    decoder: Option<DecodeOverride>,
    receiver: Option<Arc<dyn PacketReceiver>>,
}

impl std::fmt::Debug for PacketDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketDescriptor")
            .field("alias", &self.alias)
            .field("group", &self.group)
            .field("fields", &self.fields)
            .field("dumpable", &self.dumpable)
            .field("custom_encode", &self.encoder.is_some())
            .field("custom_decode", &self.decoder.is_some())
            .field("receiver", &self.receiver.is_some())
            .finish()
    }
}

impl PacketDescriptor {
    /// Start declaring a packet type.
    pub fn builder(alias: impl Into<String>) -> PacketDescriptorBuilder {
        PacketDescriptorBuilder {
            alias: alias.into(),
            group: WILDCARD_GROUP.to_string(),
            fields: Vec::new(),
            dumpable: true,
            encoder: None,
            decoder: None,
            receiver: None,
        }
    }

    /// Unique name of the type within a registry; identifies it on the wire.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The group inbound filtering matches on.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Fields in declaration order, which is also wire order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Position of the named field, in declaration order.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Whether schema export lists this type.
    pub fn dumpable(&self) -> bool {
        self.dumpable
    }

    /// Replaces the default codec for outbound packets of this type.
    pub fn encode_override(&self) -> Option<&EncodeOverride> {
        self.encoder.as_ref()
    }

    /// Replaces the default codec for inbound packets of this type.
    pub fn decode_override(&self) -> Option<&DecodeOverride> {
        self.decoder.as_ref()
    }

    /// The default receive behavior for inbound packets of this type.
    pub fn receiver(&self) -> Option<&Arc<dyn PacketReceiver>> {
        self.receiver.as_ref()
    }
}

/// Declares a [`PacketDescriptor`].
pub struct PacketDescriptorBuilder {
    alias: String,
    group: String,
    fields: Vec<FieldSpec>,
    dumpable: bool,
    encoder: Option<EncodeOverride>,
    decoder: Option<DecodeOverride>,
    receiver: Option<Arc<dyn PacketReceiver>>,
}

impl PacketDescriptorBuilder {
    /// The group label used for connection filtering.
    ///
    /// Default: `"*"`, accepted by every connection.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Append a field. Fields are encoded in the order they are declared.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec::new(name, field_type));
        self
    }

    /// Whether schema export lists this type.
    ///
    /// Default: true
    pub fn dumpable(mut self, dumpable: bool) -> Self {
        self.dumpable = dumpable;
        self
    }

    /// Take over encoding. Whatever the closure returns is the payload, verbatim.
    pub fn encode_with(
        mut self,
        encoder: impl Fn(&Packet) -> crate::Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    /// Take over decoding.
    pub fn decode_with(
        mut self,
        decoder: impl Fn(&Arc<PacketDescriptor>, &[u8]) -> crate::Result<Packet>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// What to do when a packet of this type arrives and is not a reply to a
    /// local request.
    pub fn on_recv<F, Fut>(self, on_recv: F) -> Self
    where
        F: Fn(Packet, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.receiver(on_recv)
    }

    /// Like `on_recv`, for a named receiver type.
    pub fn receiver(mut self, receiver: impl PacketReceiver) -> Self {
        self.receiver = Some(Arc::new(receiver));
        self
    }

    /// Validate the declaration.
    ///
    /// Fails with `InvalidDescriptor` when a name or field type is invalid, or
    /// when a field name repeats.
    pub fn build(self) -> crate::Result<PacketDescriptor> {
        validate_name("alias", &self.alias)?;
        validate_name("group", &self.group)?;
        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(crate::Error::InvalidDescriptor(format!(
                    "{}: field {:?} is declared twice",
                    self.alias, field.name
                )));
            }
            field.field_type.validate().map_err(|e| {
                crate::Error::InvalidDescriptor(format!("{}.{}: {e}", self.alias, field.name))
            })?;
        }
        Ok(PacketDescriptor {
            alias: self.alias,
            group: self.group,
            fields: self.fields,
            dumpable: self.dumpable,
            encoder: self.encoder,
            decoder: self.decoder,
            receiver: self.receiver,
        })
    }
}

fn validate_name(what: &str, name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidDescriptor(format!(
            "{what} must not be empty"
        )));
    }
    if MAX_NAME_LENGTH < name.len() {
        return Err(crate::Error::InvalidDescriptor(format!(
            "{what} {name:?} is {}b, the limit is {MAX_NAME_LENGTH}b",
            name.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{PacketDescriptor, WILDCARD_GROUP};
    use crate::{Error, FieldType};

    #[test]
    fn defaults() {
        let descriptor = PacketDescriptor::builder("p")
            .field("seq", FieldType::Integer)
            .build()
            .expect("valid descriptor");
        assert_eq!("p", descriptor.alias());
        assert_eq!(WILDCARD_GROUP, descriptor.group());
        assert!(descriptor.dumpable());
        assert!(descriptor.encode_override().is_none());
        assert!(descriptor.receiver().is_none());
        assert_eq!(Some(0), descriptor.field_index("seq"));
        assert_eq!(None, descriptor.field_index("nope"));
    }

    #[test]
    fn rejects_bad_declarations() {
        assert!(matches!(
            PacketDescriptor::builder("").build(),
            Err(Error::InvalidDescriptor(_))
        ));
        assert!(matches!(
            PacketDescriptor::builder("a".repeat(256)).build(),
            Err(Error::InvalidDescriptor(_))
        ));
        assert!(matches!(
            PacketDescriptor::builder("p").group("").build(),
            Err(Error::InvalidDescriptor(_))
        ));
        assert!(matches!(
            PacketDescriptor::builder("p")
                .field("a", FieldType::Integer)
                .field("a", FieldType::String)
                .build(),
            Err(Error::InvalidDescriptor(_))
        ));
        assert!(matches!(
            PacketDescriptor::builder("p")
                .field("a", FieldType::Union(vec![]))
                .build(),
            Err(Error::InvalidDescriptor(_))
        ));
    }
}
