use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use crate::{PacketDescriptor, SchemaDocument, SchemaSelector};

/// Maps aliases to packet types.
///
/// Register every packet type before connections start receiving. Registration
/// is a guarded insert, so it is safe from any thread, but a connection that
/// receives a packet before its type is registered reports an unknown alias.
#[derive(Debug, Default)]
pub struct PacketRegistry {
    packets: RwLock<HashMap<String, Arc<PacketDescriptor>>>,
}

impl PacketRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<PacketRegistry> {
        static GLOBAL: OnceLock<Arc<PacketRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(Default::default).clone()
    }

    /// Add a packet type. The registry is unchanged if the alias is taken.
    #[allow(clippy::expect_used)]
    pub fn register(&self, descriptor: PacketDescriptor) -> crate::Result<Arc<PacketDescriptor>> {
        let mut packets = self
            .packets
            .write()
            .expect("registry lock must not be poisoned");
        if packets.contains_key(descriptor.alias()) {
            log::warn!("packet {:?} already registered", descriptor.alias());
            return Err(crate::Error::DuplicateAlias(descriptor.alias().to_string()));
        }
        let descriptor = Arc::new(descriptor);
        packets.insert(descriptor.alias().to_string(), descriptor.clone());
        log::info!(
            "packet {:?} registered in group {:?}",
            descriptor.alias(),
            descriptor.group()
        );
        Ok(descriptor)
    }

    /// Look up a type by alias. Fails with `UnknownAlias`.
    #[allow(clippy::expect_used)]
    pub fn resolve(&self, alias: &str) -> crate::Result<Arc<PacketDescriptor>> {
        self.packets
            .read()
            .expect("registry lock must not be poisoned")
            .get(alias)
            .cloned()
            .ok_or_else(|| crate::Error::UnknownAlias(alias.to_string()))
    }

    /// True when a type is registered under `alias`.
    #[allow(clippy::expect_used)]
    pub fn contains(&self, alias: &str) -> bool {
        self.packets
            .read()
            .expect("registry lock must not be poisoned")
            .contains_key(alias)
    }

    /// Number of registered types.
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.packets
            .read()
            .expect("registry lock must not be poisoned")
            .len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered aliases, sorted.
    #[allow(clippy::expect_used)]
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .packets
            .read()
            .expect("registry lock must not be poisoned")
            .keys()
            .cloned()
            .collect();
        aliases.sort();
        aliases
    }

    /// List the dumpable packet types the selector picks.
    #[allow(clippy::expect_used)]
    pub fn export(&self, selector: &SchemaSelector) -> SchemaDocument {
        let packets = self
            .packets
            .read()
            .expect("registry lock must not be poisoned");
        SchemaDocument::from_descriptors(
            packets
                .values()
                .filter(|descriptor| descriptor.dumpable() && selector.selects(descriptor))
                .map(Arc::as_ref),
        )
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::PacketRegistry;
    use crate::{Error, FieldType, PacketDescriptor, SchemaDocument, SchemaSelector};

    fn ping() -> PacketDescriptor {
        PacketDescriptor::builder("p")
            .group("g")
            .field("seq", FieldType::Integer)
            .build()
            .expect("valid descriptor")
    }

    #[test]
    fn register_and_resolve() {
        let registry = PacketRegistry::new();
        assert!(registry.is_empty());
        let registered = registry.register(ping()).expect("registers");
        let resolved = registry.resolve("p").expect("resolves");
        assert!(std::sync::Arc::ptr_eq(&registered, &resolved));
        assert!(registry.contains("p"));
        assert_eq!(vec!["p".to_string()], registry.aliases());
    }

    #[test]
    fn duplicate_alias_leaves_registry_unchanged() {
        let registry = PacketRegistry::new();
        registry.register(ping()).expect("registers");
        let imposter = PacketDescriptor::builder("p")
            .group("other")
            .field("text", FieldType::String)
            .build()
            .expect("valid descriptor");
        assert!(matches!(
            registry.register(imposter),
            Err(Error::DuplicateAlias(alias)) if alias == "p"
        ));
        assert_eq!(1, registry.len());
        let resolved = registry.resolve("p").expect("resolves");
        assert_eq!("g", resolved.group());
        assert_eq!(FieldType::Integer, resolved.fields()[0].field_type);
    }

    #[test]
    fn unknown_alias() {
        let registry = PacketRegistry::new();
        assert!(matches!(
            registry.resolve("zz"),
            Err(Error::UnknownAlias(alias)) if alias == "zz"
        ));
    }

    #[test]
    fn export_lists_only_dumpable_selected_types() {
        let registry = PacketRegistry::new();
        registry.register(ping()).expect("registers");
        registry
            .register(
                PacketDescriptor::builder("secret")
                    .group("g")
                    .dumpable(false)
                    .build()
                    .expect("valid descriptor"),
            )
            .expect("registers");
        registry
            .register(
                PacketDescriptor::builder("chat")
                    .group("social")
                    .field("text", FieldType::String)
                    .field("to", FieldType::optional(FieldType::String))
                    .build()
                    .expect("valid descriptor"),
            )
            .expect("registers");

        let all = registry.export(&SchemaSelector::All);
        let aliases: Vec<&str> = all.packets.iter().map(|p| p.alias.as_str()).collect();
        assert_eq!(vec!["chat", "p"], aliases);

        let social = registry.export(&SchemaSelector::Groups(HashSet::from([
            "social".to_string()
        ])));
        assert_eq!(1, social.packets.len());
        assert_eq!("chat", social.packets[0].alias);
        assert_eq!(2, social.packets[0].fields.len());

        let json = all.to_json().expect("renders");
        assert_eq!(all, SchemaDocument::from_json(&json).expect("parses"));
    }

    #[test]
    fn exported_schema_registers_on_an_independent_peer() {
        let registry = PacketRegistry::new();
        registry.register(ping()).expect("registers");
        let json = registry
            .export(&SchemaSelector::All)
            .to_json()
            .expect("renders");

        let peer = PacketRegistry::new();
        for schema in SchemaDocument::from_json(&json).expect("parses").packets {
            peer.register(schema.to_descriptor().expect("valid descriptor"))
                .expect("registers");
        }
        let resolved = peer.resolve("p").expect("resolves");
        assert_eq!("g", resolved.group());
        assert_eq!("seq", resolved.fields()[0].name);
    }
}
