//! Runtime backend registry for selecting a GEMM strategy by name.
//!
//! Backend crates register a constructor under one or more names; layers resolve the name once,
//! at construction, and keep the resulting `Arc<dyn MatMulBackend>` for their lifetime.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use log::debug;

use super::spec::{BackendKind, MatMulBackend};

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn MatMulBackend> + Send + Sync>;

/// Global backend registry mapping backend names to constructors.
struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        debug!("registering matmul backend '{name}'");
        self.backends
            .write()
            .expect("backend registry lock poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn MatMulBackend>> {
        let registry = self.backends.read().expect("backend registry lock poisoned");
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .expect("backend registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .expect("backend registry lock poisoned")
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Register a backend by name with a constructor function.
///
/// The constructor is called each time the backend is requested via [`create_backend`].
/// Registering an existing name replaces the previous constructor.
pub fn register_matmul_backend<B, F>(name: impl Into<String>, constructor: F)
where
    B: MatMulBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    global_registry().register(
        name.into(),
        Box::new(move || Arc::new(constructor()) as Arc<dyn MatMulBackend>),
    );
}

/// Create a backend instance by name.
///
/// Returns `None` if no backend with the given name has been registered.
pub fn create_backend(name: &str) -> Option<Arc<dyn MatMulBackend>> {
    global_registry().create(name)
}

/// Create the first registered backend (by sorted name) reporting `kind`.
pub fn create_backend_of_kind(kind: BackendKind) -> Option<Arc<dyn MatMulBackend>> {
    list_backends()
        .iter()
        .filter_map(|name| create_backend(name))
        .find(|backend| backend.kind() == kind)
}

/// List all registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    global_registry().list_backends()
}

/// Check if a backend with the given name is registered.
pub fn has_backend(name: &str) -> bool {
    global_registry().has_backend(name)
}
