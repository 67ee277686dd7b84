//! Idempotent provisioning registries for collections and channels.

pub mod channels;
pub mod collections;
pub mod lock;
pub mod store;

pub use channels::{ChannelService, RegistryStatus, SubscribeOptions};
pub use collections::{
    is_well_formed_id, CollectionDiscovery, CollectionNaming, CollectionRegistry, NoDiscovery,
    ProvisionSource, Provisioned, DEFAULT_REGISTRY_PREFIX, DEFAULT_ZONE_MARKER,
};
pub use lock::{FileLock, FileLockGuard, LockConfig};
pub use store::{
    ChannelRegistryDoc, CollectionRegistryDoc, JsonFileStore, MemoryStore, RegistryDocument,
    RegistryStore, StoreLock, TOPIC_REGISTRY_FILE, ZONE_REGISTRY_FILE,
};
