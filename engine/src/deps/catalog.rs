//! Known external libraries
//!
//! Maps import prefixes to installable packages. Imports that match no entry
//! are treated as local (relative) or unknown and are left to the compiler.

use serde::Serialize;

/// One installable library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibrarySpec {
    /// Install directory name inside the library cache
    pub name: &'static str,
    /// Import prefix that identifies the library, with trailing slash
    pub import_prefix: &'static str,
    /// `owner/repo` passed to the package manager
    pub repo: &'static str,
    /// Pinned tag or branch
    pub version: &'static str,
    /// Subdirectory the prefix maps onto (may be empty)
    pub remap_subdir: &'static str,
    /// Other catalog entries this library imports from
    pub requires: &'static [&'static str],
}

impl LibrarySpec {
    /// `owner/repo@version`, the form handed to `install`.
    pub fn source_ref(&self) -> String {
        format!("{}@{}", self.repo, self.version)
    }

    /// Major version of the pinned tag, when it has one.
    pub fn major_version(&self) -> Option<u32> {
        major_version(self.version)
    }

    pub fn matches_import(&self, path: &str) -> bool {
        path.starts_with(self.import_prefix)
    }
}

pub const OPENZEPPELIN: &str = "openzeppelin-contracts";
pub const OPENZEPPELIN_UPGRADEABLE: &str = "openzeppelin-contracts-upgradeable";

static CATALOG: &[LibrarySpec] = &[
    LibrarySpec {
        name: OPENZEPPELIN,
        import_prefix: "@openzeppelin/contracts/",
        repo: "OpenZeppelin/openzeppelin-contracts",
        version: "v5.0.2",
        remap_subdir: "contracts/",
        requires: &[],
    },
    LibrarySpec {
        name: OPENZEPPELIN_UPGRADEABLE,
        import_prefix: "@openzeppelin/contracts-upgradeable/",
        repo: "OpenZeppelin/openzeppelin-contracts-upgradeable",
        version: "v5.0.2",
        remap_subdir: "contracts/",
        requires: &[OPENZEPPELIN],
    },
    LibrarySpec {
        name: "solmate",
        import_prefix: "solmate/",
        repo: "transmissions11/solmate",
        version: "v7",
        remap_subdir: "src/",
        requires: &[],
    },
    LibrarySpec {
        name: "chainlink-brownie-contracts",
        import_prefix: "@chainlink/contracts/",
        repo: "smartcontractkit/chainlink-brownie-contracts",
        version: "1.1.1",
        remap_subdir: "contracts/",
        requires: &[],
    },
    LibrarySpec {
        name: "forge-std",
        import_prefix: "forge-std/",
        repo: "foundry-rs/forge-std",
        version: "v1.9.4",
        remap_subdir: "src/",
        requires: &[],
    },
    LibrarySpec {
        name: "v3-core",
        import_prefix: "@uniswap/v3-core/",
        repo: "Uniswap/v3-core",
        version: "v1.0.0",
        remap_subdir: "",
        requires: &[],
    },
    LibrarySpec {
        name: "v3-periphery",
        import_prefix: "@uniswap/v3-periphery/",
        repo: "Uniswap/v3-periphery",
        version: "v1.0.0",
        remap_subdir: "",
        requires: &["v3-core"],
    },
];

/// The full catalog.
pub fn known_libraries() -> &'static [LibrarySpec] {
    CATALOG
}

/// Library providing an import path, if any.
pub fn library_for_import(path: &str) -> Option<&'static LibrarySpec> {
    CATALOG.iter().find(|lib| lib.matches_import(path))
}

pub fn library_by_name(name: &str) -> Option<&'static LibrarySpec> {
    CATALOG.iter().find(|lib| lib.name == name)
}

/// Parse the major component of a tag like `v5.0.2`, `5.0`, or `v7`.
pub fn major_version(tag: &str) -> Option<u32> {
    let trimmed = tag.trim().trim_start_matches(['v', 'V']);
    trimmed.split('.').next()?.parse().ok()
}
