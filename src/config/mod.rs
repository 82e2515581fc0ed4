/// Collection declarations loading from store.toml
pub mod collections;

/// Store location from environment variables
pub mod store;

pub use collections::{
    CollectionConfig, StoreConfig, default_collections, load_config, load_store_configuration,
};
