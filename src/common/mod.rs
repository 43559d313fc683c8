mod namespace;
mod resource_key;
mod upstream;

pub use namespace::{NamespaceAllowList, NamespaceFilter};
pub use resource_key::{InvalidKeyError, ResourceKey, DEFAULT_NAMESPACE_NAME};
pub use upstream::*;

pub const DEFAULT_CLUSTER_NAME: &str = "default";
