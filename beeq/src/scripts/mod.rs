//! Script registry
//!
//! Discovers the Lua scripts behind the atomic commands, fingerprints them
//! and caches the result for the lifetime of the registry.
//!
//! Loading is single-flight: concurrent callers share one in-flight load and
//! all observe its outcome. A successful load is cached; a failed load is
//! not, so the next call scans again.

mod source;

pub use source::{DirSource, MemorySource, ScriptSource};

use crate::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Extension of script files
pub const SCRIPT_EXTENSION: &str = ".lua";

/// A loaded script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    source: String,
    fingerprint: String,
}

impl Script {
    /// Build a script, computing its fingerprint
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let fingerprint = fingerprint(&source);
        Self {
            name: name.into(),
            source,
            fingerprint,
        }
    }

    /// Command name (file stem)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw Lua source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Hex SHA-1 of the source, as used by `EVALSHA`
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Hex SHA-1 digest of a script body
pub fn fingerprint(source: &str) -> String {
    fred::util::sha1_hash(source)
}

/// Result of a registry load
#[derive(Debug, Default)]
pub struct ScriptSet {
    scripts: HashMap<String, Arc<Script>>,
    fingerprints: HashMap<String, String>,
}

impl ScriptSet {
    fn insert(&mut self, script: Script) {
        self.fingerprints
            .insert(script.name.clone(), script.fingerprint.clone());
        self.scripts.insert(script.name.clone(), Arc::new(script));
    }

    /// Look up a script by command name
    pub fn get(&self, name: &str) -> Option<&Arc<Script>> {
        self.scripts.get(name)
    }

    /// Look up only the fingerprint of a script
    pub fn fingerprint(&self, name: &str) -> Option<&str> {
        self.fingerprints.get(name).map(String::as_str)
    }

    /// All fingerprints keyed by command name
    pub fn fingerprints(&self) -> &HashMap<String, String> {
        &self.fingerprints
    }

    /// Iterate over all scripts
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Script>> {
        self.scripts.values()
    }

    /// Number of scripts
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether no scripts were discovered
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<ScriptSet>>>>;

enum LoadState {
    Idle,
    Loading { generation: u64, future: LoadFuture },
    Loaded(Arc<ScriptSet>),
}

struct Inner {
    state: LoadState,
    generation: u64,
}

/// Initialize-once cache of the script set
pub struct ScriptRegistry {
    source: Arc<dyn ScriptSource>,
    inner: Mutex<Inner>,
}

static SHARED: Lazy<Arc<ScriptRegistry>> = Lazy::new(|| Arc::new(ScriptRegistry::bundled()));

/// Directory holding the scripts shipped with this crate
pub fn bundled_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/lua"))
}

impl ScriptRegistry {
    /// Create a registry over any source
    pub fn new(source: impl ScriptSource) -> Self {
        Self {
            source: Arc::new(source),
            inner: Mutex::new(Inner {
                state: LoadState::Idle,
                generation: 0,
            }),
        }
    }

    /// Create a registry over the bundled script directory
    pub fn bundled() -> Self {
        Self::new(DirSource::new(bundled_dir()))
    }

    /// Process-wide registry over the bundled scripts
    pub fn shared() -> Arc<ScriptRegistry> {
        SHARED.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guard is never held across an await or user code
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a successful load has been cached
    pub fn is_loaded(&self) -> bool {
        matches!(self.lock().state, LoadState::Loaded(_))
    }

    /// The cached script set, without triggering a load
    pub fn cached(&self) -> Option<Arc<ScriptSet>> {
        match &self.lock().state {
            LoadState::Loaded(set) => Some(set.clone()),
            _ => None,
        }
    }

    /// Load all scripts, sharing any load already in flight
    pub async fn load_all(&self) -> Result<Arc<ScriptSet>> {
        let (generation, future) = {
            let mut inner = self.lock();
            match &inner.state {
                LoadState::Loaded(set) => return Ok(set.clone()),
                LoadState::Loading { generation, future } => (*generation, future.clone()),
                LoadState::Idle => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let future = load(self.source.clone()).boxed().shared();
                    inner.state = LoadState::Loading {
                        generation,
                        future: future.clone(),
                    };
                    (generation, future)
                }
            }
        };

        let result = future.await;

        // Only the load we awaited may settle the state; a newer one may
        // already be running after an earlier failure.
        let mut inner = self.lock();
        let current = match &inner.state {
            LoadState::Loading { generation, .. } => Some(*generation),
            _ => None,
        };
        if current == Some(generation) {
            inner.state = match &result {
                Ok(set) => LoadState::Loaded(set.clone()),
                Err(_) => LoadState::Idle,
            };
        }

        result
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("source", &self.source.describe())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

async fn load(source: Arc<dyn ScriptSource>) -> Result<Arc<ScriptSet>> {
    tracing::debug!("Scanning scripts in {}", source.describe());

    let entries: Vec<String> = source
        .list()
        .await?
        .into_iter()
        .filter(|entry| entry.ends_with(SCRIPT_EXTENSION))
        .collect();

    let reads = entries.iter().map(|entry| {
        let source = source.clone();
        async move {
            let text = source.read(entry).await?;
            let name = &entry[..entry.len() - SCRIPT_EXTENSION.len()];
            Ok::<_, crate::Error>(Script::new(name, text))
        }
    });
    let scripts = futures::future::try_join_all(reads).await?;

    let mut set = ScriptSet::default();
    for script in scripts {
        tracing::debug!("Loaded script {} ({})", script.name(), script.fingerprint());
        set.insert(script);
    }

    tracing::debug!("Loaded {} scripts from {}", set.len(), source.describe());
    Ok(Arc::new(set))
}
