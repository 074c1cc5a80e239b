//! Protocol registry: adapters keyed by `(name, version)`.
//!
//! Built once at startup through [`RegistryBuilder`], then frozen into a
//! [`ProtocolRegistry`] that sessions share behind an `Arc`. Nothing mutates
//! it afterwards, so concurrent `resolve` calls need no locking.

use std::sync::Arc;

use capgate::{CapabilityAdapter, ProtocolDescriptor, Version};
use thiserror::Error;

/// Registration and resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("protocol {name}@{version} is already registered")]
    DuplicateProtocol { name: String, version: Version },

    #[error("no registered '{name}' protocol is compatible with version {version}")]
    NoCompatibleProtocol { name: String, version: Version },
}

/// A registered adapter together with the descriptor it was registered under.
pub struct Binding {
    pub descriptor: ProtocolDescriptor,
    pub adapter: Arc<dyn CapabilityAdapter>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.descriptor.name)
            .field("version", &self.descriptor.version)
            .finish()
    }
}

impl Binding {
    /// `name@version`, for logs.
    pub fn label(&self) -> String {
        format!("{}@{}", self.descriptor.name, self.descriptor.version)
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Default, Debug)]
pub struct RegistryBuilder {
    bindings: Vec<Arc<Binding>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under `descriptor`.
    pub fn register(
        &mut self,
        descriptor: ProtocolDescriptor,
        adapter: Arc<dyn CapabilityAdapter>,
    ) -> Result<&mut Self, RegistryError> {
        if self
            .bindings
            .iter()
            .any(|b| b.descriptor.key() == descriptor.key())
        {
            return Err(RegistryError::DuplicateProtocol {
                name: descriptor.name,
                version: descriptor.version,
            });
        }

        tracing::debug!(
            "Registered protocol {}@{} (serves {})",
            descriptor.name,
            descriptor.version,
            descriptor.compatibility
        );
        self.bindings.push(Arc::new(Binding {
            descriptor,
            adapter,
        }));
        Ok(self)
    }

    /// Register an adapter under its own descriptor.
    pub fn add(&mut self, adapter: Arc<dyn CapabilityAdapter>) -> Result<&mut Self, RegistryError> {
        let descriptor = adapter.describe().clone();
        self.register(descriptor, adapter)
    }

    /// Freeze the registry.
    pub fn build(self) -> ProtocolRegistry {
        let mut bindings = self.bindings;
        bindings.sort_by(|a, b| {
            a.descriptor
                .name
                .cmp(&b.descriptor.name)
                .then(b.descriptor.version.cmp(&a.descriptor.version))
        });
        ProtocolRegistry { bindings }
    }
}

/// Immutable snapshot of every registered protocol.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    // sorted by name, newest version first
    bindings: Vec<Arc<Binding>>,
}

impl ProtocolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The newest registered version of `name` whose compatibility range
    /// contains `requested`.
    pub fn resolve(&self, name: &str, requested: &Version) -> Result<Arc<Binding>, RegistryError> {
        self.bindings
            .iter()
            .filter(|b| b.descriptor.name == name)
            .filter(|b| b.descriptor.compatibility.contains(requested))
            .max_by(|a, b| a.descriptor.version.cmp(&b.descriptor.version))
            .cloned()
            .ok_or_else(|| RegistryError::NoCompatibleProtocol {
                name: name.to_string(),
                version: *requested,
            })
    }

    /// Every registered descriptor, sorted by name then newest version.
    pub fn descriptors(&self) -> impl Iterator<Item = &ProtocolDescriptor> {
        self.bindings.iter().map(|b| &b.descriptor)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
