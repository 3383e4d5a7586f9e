//! Library dependencies: detection, cache-safe installs, remappings

pub mod catalog;
pub mod lock;
pub mod remappings;
pub mod resolver;
pub mod vcs;

pub use catalog::{known_libraries, library_by_name, library_for_import, LibrarySpec};
pub use lock::{CacheLock, LockError};
pub use resolver::{
    required_libraries, DependencyError, DependencyResolver, PackageManager, PackageManagerError,
    ResolverConfig,
};
pub use vcs::repair_vcs_metadata;
