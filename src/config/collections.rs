//! Collection declarations loaded from store.toml
//!
//! Every collection has a layout (flat or scoped), a backing file name and an
//! optional list of legacy on-disk shapes the compat loader should accept.
//! Declarations in the file replace the built-in default of the same name.

use crate::config::store::{DEFAULT_DATA_DIR, config_path, data_dir_from_env};
use crate::errors::{Error, Result};
use crate::store::compat::{Shape, ShapeDescriptor};
use crate::store::model::Layout;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration structure representing the entire store.toml file
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    /// Directory holding the collection files
    pub data_dir: Option<PathBuf>,
    /// Collection declarations
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// Declaration of a single collection
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Collection name used by callers, e.g. `economy`
    pub name: String,
    /// Key-path depth
    #[serde(default)]
    pub layout: Layout,
    /// Backing file name inside the data directory; defaults to `<name>.json`
    #[serde(default)]
    pub file: Option<String>,
    /// Older on-disk shapes to migrate from
    #[serde(default)]
    pub legacy: Vec<Shape>,
}

impl CollectionConfig {
    #[must_use]
    pub fn new(name: &str, layout: Layout) -> Self {
        Self {
            name: name.to_string(),
            layout,
            file: None,
            legacy: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_legacy(mut self, shape: Shape) -> Self {
        self.legacy.push(shape);
        self
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| format!("{}.json", self.name))
    }

    pub fn descriptor(&self) -> Result<ShapeDescriptor> {
        ShapeDescriptor::new(self.layout, self.legacy.clone()).map_err(|e| Error::Config {
            message: format!("collection '{}': {e}", self.name),
        })
    }
}

/// Resolved store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub collections: Vec<CollectionConfig>,
}

impl StoreConfig {
    /// A configuration with the default collections rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            collections: default_collections(),
        }
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Applies file declarations over the defaults.
    fn merge(&mut self, file: FileConfig) {
        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        for declared in file.collections {
            match self.collections.iter_mut().find(|c| c.name == declared.name) {
                Some(existing) => *existing = declared,
                None => self.collections.push(declared),
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (i, collection) in self.collections.iter().enumerate() {
            if collection.name.trim().is_empty() {
                return Err(Error::Config {
                    message: "Collection name cannot be empty".to_string(),
                });
            }
            if self.collections[..i].iter().any(|c| c.file_name() == collection.file_name()) {
                return Err(Error::Config {
                    message: format!(
                        "collection '{}' shares its file '{}' with another collection",
                        collection.name,
                        collection.file_name()
                    ),
                });
            }
            collection.descriptor()?;
        }
        Ok(())
    }
}

/// The collections the bot has always kept, with the shapes found in old data files.
#[must_use]
pub fn default_collections() -> Vec<CollectionConfig> {
    vec![
        CollectionConfig::new("economy", Layout::Flat),
        CollectionConfig::new("inventory", Layout::Flat).with_legacy(Shape::IdArray {
            id_field: "id".to_string(),
        }),
        CollectionConfig::new("userdata", Layout::Flat).with_legacy(Shape::IdArray {
            id_field: "id".to_string(),
        }),
        CollectionConfig::new("xp", Layout::Scoped),
        CollectionConfig::new("moderation", Layout::Scoped),
        CollectionConfig::new("servershop", Layout::Scoped).with_legacy(Shape::ScopedIdArray {
            id_field: "name".to_string(),
        }),
        CollectionConfig::new("serversettings", Layout::Flat),
        CollectionConfig::new("triggers", Layout::Scoped),
    ]
}

/// Parses store.toml contents and applies them over the defaults.
pub fn parse_config(contents: &str) -> Result<StoreConfig> {
    let file: FileConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse store.toml: {e}"),
    })?;

    let mut config = StoreConfig::with_data_dir(DEFAULT_DATA_DIR);
    config.merge(file);
    config.validate()?;
    Ok(config)
}

/// Loads the configuration from a TOML file. A missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StoreConfig> {
    let path = path.as_ref();
    debug!("Attempting to load store configuration from: {:?}", path);

    let config = match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No config file at {:?}; using default collections", path);
            StoreConfig::with_data_dir(DEFAULT_DATA_DIR)
        }
        Err(e) => {
            return Err(Error::Config {
                message: format!("Failed to read config file {path:?}: {e}"),
            });
        }
    };

    Ok(config)
}

/// Loads the configuration from `STORE_CONFIG` and applies `STORE_DATA_DIR`.
pub fn load_store_configuration() -> Result<StoreConfig> {
    let mut config = load_config(config_path())?;
    if let Some(dir) = data_dir_from_env() {
        config.data_dir = dir;
    }
    info!(
        "Store configured at {:?} with {} collections",
        config.data_dir,
        config.collections.len()
    );
    Ok(config)
}
