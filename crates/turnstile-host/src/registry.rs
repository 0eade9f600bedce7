use anyhow::bail;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::{Script, ScriptOptions, short_type_name};

/// Factory producing fresh script instances
pub type ScriptFactory = Arc<dyn Fn() -> Box<dyn Script> + Send + Sync>;

/// Everything needed to instantiate one script type
#[derive(Clone)]
pub struct ScriptDescriptor {
    pub type_name: String,
    pub file: Option<PathBuf>,
    pub options: ScriptOptions,
    factory: ScriptFactory,
}

impl ScriptDescriptor {
    pub fn new(
        type_name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Script> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            file: None,
            options: ScriptOptions::default(),
            factory: Arc::new(factory),
        }
    }

    /// Descriptor for a script type constructed with `Default`
    pub fn of<S: Script + Default>() -> Self {
        Self::new(short_type_name::<S>(), || Box::new(S::default()))
    }

    /// Record the file this script type was loaded from
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_options(mut self, options: ScriptOptions) -> Self {
        self.options = options;
        self
    }

    pub fn instantiate(&self) -> Box<dyn Script> {
        (self.factory)()
    }
}

impl fmt::Debug for ScriptDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDescriptor")
            .field("type_name", &self.type_name)
            .field("file", &self.file)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Turns a script file into the script types it declares.
///
/// Compiling or loading source files is the host's business; the scheduler
/// only consumes the resulting descriptors.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<Vec<ScriptDescriptor>>;
}

/// Catalog of known script types, by type name
#[derive(Default, Clone)]
pub struct ScriptCatalog {
    descriptors: BTreeMap<String, ScriptDescriptor>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a descriptor
    pub fn register(&mut self, descriptor: ScriptDescriptor) {
        debug!(target: "scripting", "Registering script type: {}", descriptor.type_name);
        self.descriptors
            .insert(descriptor.type_name.clone(), descriptor);
    }

    /// Register a `Default`-constructible script type
    pub fn register_type<S: Script + Default>(&mut self, options: ScriptOptions) {
        self.register(ScriptDescriptor::of::<S>().with_options(options));
    }

    pub fn get(&self, type_name: &str) -> Option<&ScriptDescriptor> {
        self.descriptors.get(type_name)
    }

    /// Every descriptor declared for `path`, in type-name order
    pub fn in_file(&self, path: &Path) -> Vec<ScriptDescriptor> {
        self.descriptors
            .values()
            .filter(|d| d.file.as_deref() == Some(path))
            .cloned()
            .collect()
    }

    /// Names of all registered script types
    pub fn available_scripts(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl ScriptLoader for ScriptCatalog {
    fn load(&self, path: &Path) -> anyhow::Result<Vec<ScriptDescriptor>> {
        let found = self.in_file(path);
        if found.is_empty() {
            bail!("no script types are declared for {}", path.display());
        }
        Ok(found)
    }
}

/// Register several `Default`-constructible script types at once
///
/// # Example
/// ```ignore
/// let mut catalog = ScriptCatalog::new();
/// register_scripts!(catalog, HelloTicker, KeyLogger);
/// ```
#[macro_export]
macro_rules! register_scripts {
    ($catalog:expr, $($script:ty),+ $(,)?) => {
        $(
            $catalog.register_type::<$script>($crate::ScriptOptions::default());
        )+
    };
}
