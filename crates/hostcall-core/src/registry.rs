//! Host function registry.
//!
//! A [`HostFunctionRegistry`] is built by the embedder, then frozen into an
//! immutable [`FunctionScope`] that instances share by `Arc`. Lookups on a
//! scope never lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::RegistryError;
use crate::signature::{HostFunction, HostFunctionDescriptor};

/// Proof of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    name: String,
    index: usize,
}

impl RegistrationHandle {
    /// Registered function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration order within the registry.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Append-only, name-keyed table of host functions.
#[derive(Default)]
pub struct HostFunctionRegistry {
    functions: Vec<Arc<HostFunctionDescriptor>>,
    index: HashMap<String, usize>,
}

impl HostFunctionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is already taken
    /// in this registry.
    pub fn register(
        &mut self,
        descriptor: HostFunctionDescriptor,
    ) -> Result<RegistrationHandle, RegistryError> {
        let name = descriptor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let index = self.functions.len();
        debug!(
            function = %name,
            namespace = descriptor.namespace(),
            arity = descriptor.arity(),
            "Registered host function"
        );
        self.functions.push(Arc::new(descriptor));
        self.index.insert(name.clone(), index);
        Ok(RegistrationHandle { name, index })
    }

    /// Build and register a function in one step.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Signature`] if the builder fails and
    /// [`RegistryError::DuplicateName`] if the name is taken.
    pub fn define(&mut self, function: HostFunction) -> Result<RegistrationHandle, RegistryError> {
        let descriptor = function.build()?;
        self.register(descriptor)
    }

    /// Look up a function by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no function has that name.
    pub fn resolve(&self, name: &str) -> Result<Arc<HostFunctionDescriptor>, RegistryError> {
        lookup(&self.functions, &self.index, name)
    }

    /// Whether a function with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered functions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<HostFunctionDescriptor>> {
        self.functions.iter()
    }

    /// Freeze into an immutable scope.
    #[must_use]
    pub fn freeze(self) -> FunctionScope {
        FunctionScope {
            functions: self.functions,
            index: self.index,
        }
    }
}

impl fmt::Debug for HostFunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunctionRegistry")
            .field("functions", &names(&self.functions))
            .finish()
    }
}

/// A frozen registry shared by the instances that link against it.
#[derive(Default)]
pub struct FunctionScope {
    functions: Vec<Arc<HostFunctionDescriptor>>,
    index: HashMap<String, usize>,
}

impl FunctionScope {
    /// A scope with no functions.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a function by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no function has that name.
    pub fn resolve(&self, name: &str) -> Result<Arc<HostFunctionDescriptor>, RegistryError> {
        lookup(&self.functions, &self.index, name)
    }

    /// Whether a function with this name is in scope.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of functions in scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the scope is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Functions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<HostFunctionDescriptor>> {
        self.functions.iter()
    }

    /// Function names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        names(&self.functions)
    }
}

impl fmt::Debug for FunctionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionScope")
            .field("functions", &self.names())
            .finish()
    }
}

fn lookup(
    functions: &[Arc<HostFunctionDescriptor>],
    index: &HashMap<String, usize>,
    name: &str,
) -> Result<Arc<HostFunctionDescriptor>, RegistryError> {
    index
        .get(name)
        .and_then(|&i| functions.get(i))
        .map(Arc::clone)
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))
}

fn names(functions: &[Arc<HostFunctionDescriptor>]) -> Vec<&str> {
    functions.iter().map(|f| f.name()).collect()
}
