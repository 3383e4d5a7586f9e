//! Dependency resolution
//!
//! Detects library imports in generated source, installs whatever the shared
//! cache is missing through a [`PackageManager`], and points the project's
//! remappings at the cache. Installs run under the [`CacheLock`]; the
//! installed set is re-read after the lock is taken because another workflow
//! may have installed the library while this one waited.

use crate::context::types::DependencyDescriptor;
use crate::deps::catalog::{self, LibrarySpec};
use crate::deps::lock::{CacheLock, LockError};
use crate::deps::remappings;
use crate::deps::vcs;
use crate::healing::source;
use crate::retry::policy::Backoff;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PackageManagerError {
    pub message: String,
}

impl PackageManagerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Installs libraries into the shared cache.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Install `library` into `<cache_dir>/lib/<name>`.
    async fn install(&self, cache_dir: &Path, library: &LibrarySpec) -> Result<(), PackageManagerError>;

    /// Names of libraries present in the cache.
    async fn list_installed(&self, cache_dir: &Path) -> Result<BTreeSet<String>, PackageManagerError>;

    async fn version(&self) -> Option<String> {
        None
    }
}

#[derive(Error, Debug)]
pub enum DependencyError {
    /// Fatal: the resolver does not retry past its install budget
    #[error("Failed to install {library} after {attempts} attempt(s): {message}")]
    InstallExhausted {
        library: String,
        attempts: u32,
        message: String,
    },

    #[error("Could not list installed libraries: {0}")]
    List(#[source] PackageManagerError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Metadata repair failed in {path}: {source}")]
    Repair {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write remappings in {path}: {source}")]
    Remappings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_dir: PathBuf,
    /// Install attempts per library before giving up
    pub install_attempts: u32,
    pub install_backoff: Backoff,
    pub lock_timeout: Duration,
}

impl ResolverConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            install_attempts: 3,
            install_backoff: Backoff::Fixed { delay_ms: 1_000 },
            lock_timeout: Duration::from_secs(300),
        }
    }
}

pub struct DependencyResolver {
    package_manager: Arc<dyn PackageManager>,
    config: ResolverConfig,
}

impl DependencyResolver {
    pub fn new(package_manager: Arc<dyn PackageManager>, config: ResolverConfig) -> Self {
        Self {
            package_manager,
            config,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub fn package_manager(&self) -> &Arc<dyn PackageManager> {
        &self.package_manager
    }

    /// Repair cache metadata before any install. Run once per workflow.
    pub async fn check_preconditions(&self) -> Result<Vec<String>, DependencyError> {
        let _lock = CacheLock::acquire(&self.config.cache_dir, self.config.lock_timeout).await?;
        vcs::repair_vcs_metadata(&self.config.cache_dir).map_err(|source| DependencyError::Repair {
            path: self.config.cache_dir.clone(),
            source,
        })
    }

    /// Install what `source` imports and rewrite the project's remappings.
    pub async fn resolve(
        &self,
        source_code: &str,
        project_dir: &Path,
    ) -> Result<Vec<DependencyDescriptor>, DependencyError> {
        let required = required_libraries(source_code);
        if required.is_empty() {
            return Ok(Vec::new());
        }

        let cache = &self.config.cache_dir;
        let mut installed = self
            .package_manager
            .list_installed(cache)
            .await
            .map_err(DependencyError::List)?;
        let mut attempts: Vec<(&'static str, u32)> = Vec::new();

        if required.iter().any(|lib| !installed.contains(lib.name)) {
            let _lock = CacheLock::acquire(cache, self.config.lock_timeout).await?;
            installed = self
                .package_manager
                .list_installed(cache)
                .await
                .map_err(DependencyError::List)?;

            for lib in &required {
                if installed.contains(lib.name) {
                    continue;
                }
                let used = self.install_with_retries(lib).await?;
                attempts.push((lib.name, used));
                installed.insert(lib.name.to_string());
            }
        }

        let descriptors: Vec<DependencyDescriptor> = required
            .iter()
            .map(|lib| DependencyDescriptor {
                name: lib.name.to_string(),
                source_ref: lib.source_ref(),
                installed: true,
                remapping_entry: remapping_entry(cache, lib),
                install_attempts: attempts
                    .iter()
                    .find(|(name, _)| *name == lib.name)
                    .map(|(_, n)| *n)
                    .unwrap_or(0),
            })
            .collect();

        let entries: Vec<String> = descriptors.iter().map(|d| d.remapping_entry.clone()).collect();
        remappings::write_merged(project_dir, &entries).map_err(|source| DependencyError::Remappings {
            path: project_dir.to_path_buf(),
            source,
        })?;

        info!(
            libraries = ?descriptors.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            installed_now = attempts.len(),
            "Dependencies resolved"
        );
        Ok(descriptors)
    }

    async fn install_with_retries(&self, lib: &LibrarySpec) -> Result<u32, DependencyError> {
        let max = self.config.install_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max {
            match self.package_manager.install(&self.config.cache_dir, lib).await {
                Ok(()) => {
                    info!(library = lib.name, attempt, "Library installed");
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(library = lib.name, attempt, max, error = %e, "Install failed");
                    last_error = e.message;
                    if attempt < max {
                        tokio::time::sleep(self.config.install_backoff.delay(attempt)).await;
                    }
                }
            }
        }
        Err(DependencyError::InstallExhausted {
            library: lib.name.to_string(),
            attempts: max,
            message: last_error,
        })
    }
}

/// Catalog libraries `source` imports, plus what they require, deduplicated
/// in first-seen order.
pub fn required_libraries(source_code: &str) -> Vec<&'static LibrarySpec> {
    let mut seen: Vec<&'static LibrarySpec> = Vec::new();
    let mut queue: Vec<&'static LibrarySpec> = source::imports(source_code)
        .into_iter()
        .filter_map(|(_, path)| catalog::library_for_import(&path))
        .collect();
    queue.reverse();

    while let Some(lib) = queue.pop() {
        if seen.iter().any(|s| s.name == lib.name) {
            continue;
        }
        seen.push(lib);
        for dep in lib.requires.iter().rev() {
            if let Some(spec) = catalog::library_by_name(dep) {
                queue.push(spec);
            }
        }
    }
    seen
}

/// `prefix=<cache>/lib/<name>/<subdir>`
pub fn remapping_entry(cache_dir: &Path, lib: &LibrarySpec) -> String {
    let target = cache_dir.join("lib").join(lib.name);
    let mut target = target.to_string_lossy().to_string();
    if !target.ends_with('/') {
        target.push('/');
    }
    target.push_str(lib.remap_subdir);
    format!("{}={}", lib.import_prefix, target)
}

impl DependencyError {
    /// The library the failure concerns, when there is one.
    pub fn library(&self) -> Option<&str> {
        match self {
            Self::InstallExhausted { library, .. } => Some(library),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory cache shared by every resolver pointed at it.
    #[derive(Default)]
    struct FakePackageManager {
        installed: Mutex<BTreeSet<String>>,
        failures_left: Mutex<HashMap<String, u32>>,
        install_calls: AtomicU32,
        active: AtomicU32,
        max_active: AtomicU32,
        install_delay: Duration,
    }

    #[async_trait]
    impl PackageManager for FakePackageManager {
        async fn install(&self, _cache_dir: &Path, library: &LibrarySpec) -> Result<(), PackageManagerError> {
            self.install_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.install_delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(library.name) {
                if *left > 0 {
                    *left -= 1;
                    return Err(PackageManagerError::new("connection reset by peer"));
                }
            }
            self.installed.lock().unwrap().insert(library.name.to_string());
            Ok(())
        }

        async fn list_installed(&self, _cache_dir: &Path) -> Result<BTreeSet<String>, PackageManagerError> {
            Ok(self.installed.lock().unwrap().clone())
        }
    }

    const UPGRADEABLE: &str = r#"pragma solidity ^0.8.20;
import {Initializable} from "@openzeppelin/contracts-upgradeable/proxy/utils/Initializable.sol";
import "./Local.sol";
contract Box is Initializable {}
"#;

    fn config(cache: &Path) -> ResolverConfig {
        ResolverConfig {
            cache_dir: cache.to_path_buf(),
            install_attempts: 3,
            install_backoff: Backoff::Fixed { delay_ms: 1 },
            lock_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_required_libraries_follow_requires() {
        let libs: Vec<_> = required_libraries(UPGRADEABLE).iter().map(|l| l.name).collect();
        assert_eq!(libs, vec![catalog::OPENZEPPELIN_UPGRADEABLE, catalog::OPENZEPPELIN]);
        assert!(required_libraries("contract A {}").is_empty());
    }

    #[test]
    fn test_remapping_entry_shape() {
        let lib = catalog::library_by_name(catalog::OPENZEPPELIN).unwrap();
        assert_eq!(
            remapping_entry(Path::new("/cache"), lib),
            "@openzeppelin/contracts/=/cache/lib/openzeppelin-contracts/contracts/"
        );
    }

    #[tokio::test]
    async fn test_installs_missing_and_writes_remappings() {
        let cache = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePackageManager::default());
        pm.installed.lock().unwrap().insert(catalog::OPENZEPPELIN.to_string());

        let resolver = DependencyResolver::new(pm.clone(), config(cache.path()));
        let deps = resolver.resolve(UPGRADEABLE, project.path()).await.unwrap();

        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].install_attempts, 1);
        assert_eq!(deps[1].install_attempts, 0);
        assert_eq!(pm.install_calls.load(Ordering::SeqCst), 1);

        let remaps = std::fs::read_to_string(project.path().join(remappings::REMAPPINGS_FILE)).unwrap();
        assert!(remaps.contains("@openzeppelin/contracts-upgradeable/="));
        assert!(remaps.contains("@openzeppelin/contracts/="));
        // lock released
        assert!(!CacheLock::lock_path(cache.path()).exists());
    }

    #[tokio::test]
    async fn test_transient_install_failure_retried() {
        let cache = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePackageManager::default());
        pm.failures_left.lock().unwrap().insert(catalog::OPENZEPPELIN.to_string(), 2);
        pm.installed.lock().unwrap().insert(catalog::OPENZEPPELIN_UPGRADEABLE.to_string());

        let resolver = DependencyResolver::new(pm.clone(), config(cache.path()));
        let deps = resolver.resolve(UPGRADEABLE, project.path()).await.unwrap();
        let oz = deps.iter().find(|d| d.name == catalog::OPENZEPPELIN).unwrap();
        assert_eq!(oz.install_attempts, 3);
    }

    #[tokio::test]
    async fn test_install_budget_exhausted_is_fatal() {
        let cache = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePackageManager::default());
        pm.failures_left.lock().unwrap().insert(catalog::OPENZEPPELIN.to_string(), 10);
        pm.installed.lock().unwrap().insert(catalog::OPENZEPPELIN_UPGRADEABLE.to_string());

        let resolver = DependencyResolver::new(pm.clone(), config(cache.path()));
        let err = resolver.resolve(UPGRADEABLE, project.path()).await.unwrap_err();
        match &err {
            DependencyError::InstallExhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.library(), Some(catalog::OPENZEPPELIN));
        assert_eq!(pm.install_calls.load(Ordering::SeqCst), 3);
        assert!(!project.path().join(remappings::REMAPPINGS_FILE).exists());
    }

    #[tokio::test]
    async fn test_concurrent_workflows_install_once() {
        let cache = tempfile::tempdir().unwrap();
        let project_a = tempfile::tempdir().unwrap();
        let project_b = tempfile::tempdir().unwrap();
        let pm = Arc::new(FakePackageManager {
            install_delay: Duration::from_millis(150),
            ..Default::default()
        });

        let a = DependencyResolver::new(pm.clone(), config(cache.path()));
        let b = DependencyResolver::new(pm.clone(), config(cache.path()));
        let source = "import {ERC20} from \"@openzeppelin/contracts/token/ERC20/ERC20.sol\";\ncontract T {}\n";

        let (ra, rb) = tokio::join!(a.resolve(source, project_a.path()), b.resolve(source, project_b.path()));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(pm.install_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pm.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(ra[0].install_attempts + rb[0].install_attempts, 1);
    }

    #[tokio::test]
    async fn test_preconditions_repair_under_lock() {
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(
            cache.path().join(vcs::GITMODULES_FILE),
            "[submodule \"lib/solmate\"]\n\tpath = lib/solmate\n\turl = https://github.com/transmissions11/solmate\n",
        )
        .unwrap();
        let resolver = DependencyResolver::new(Arc::new(FakePackageManager::default()), config(cache.path()));
        let repairs = resolver.check_preconditions().await.unwrap();
        assert_eq!(repairs.len(), 1);
        assert!(!cache.path().join(vcs::GITMODULES_FILE).exists());
    }
}
