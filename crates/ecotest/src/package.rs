//! Package and registry data model, and the on-disk registry reader.
//!
//! A registry is a directory containing a `Registry.toml` descriptor naming
//! the registry and listing its packages by id, plus one subdirectory per
//! package holding a `Deps.toml` descriptor keyed by version.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 128-bit identifier unique across a registry (and, for standard-library
/// packages, across the whole run).
pub type PackageId = Uuid;

/// An immutable package record.
///
/// Packages are never mutated once constructed; equality is field-wise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub id: PackageId,
    pub metadata_path: PathBuf,
    pub version: Option<Version>,
    pub registry_name: Option<String>,
}

impl Package {
    /// True for a package that ships with the runtime rather than coming
    /// from a registry.
    pub fn is_stdlib(&self) -> bool {
        self.registry_name.is_none()
    }
}

/// A catalogue of packages, parsed from an on-disk `Registry.toml`.
#[derive(Debug, Clone)]
pub struct Registry {
    pub name: String,
    pub id: PackageId,
    pub path: PathBuf,
    pub packages: Vec<Package>,
}

#[derive(Debug, Deserialize)]
struct RegistryDescriptor {
    name: String,
    id: Uuid,
    packages: BTreeMap<Uuid, RegistryEntry>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    name: String,
    path: PathBuf,
}

/// `Deps.toml`: version string -> (dependency name -> dependency id).
type DepsDescriptor = BTreeMap<String, BTreeMap<String, Uuid>>;

pub const REGISTRY_DESCRIPTOR_FILE: &str = "Registry.toml";
pub const DEPS_DESCRIPTOR_FILE: &str = "Deps.toml";

impl Registry {
    /// Parse a registry rooted at `path`. Fails if `Registry.toml` is
    /// missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let descriptor_path = path.join(REGISTRY_DESCRIPTOR_FILE);
        let raw = std::fs::read_to_string(&descriptor_path).with_context(|| {
            format!(
                "registry descriptor not found at {}",
                descriptor_path.display()
            )
        })?;
        let descriptor: RegistryDescriptor = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", descriptor_path.display()))?;

        let mut packages = Vec::with_capacity(descriptor.packages.len());
        for (id, entry) in &descriptor.packages {
            let package_dir = path.join(&entry.path);
            let version = max_available_version(&package_dir, &entry.name)?;
            packages.push(Package {
                name: entry.name.clone(),
                id: *id,
                metadata_path: package_dir,
                version,
                registry_name: Some(descriptor.name.clone()),
            });
        }
        // Deterministic order independent of the map's iteration order.
        packages.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(Registry {
            name: descriptor.name,
            id: descriptor.id,
            path: path.to_path_buf(),
            packages,
        })
    }

    /// Load the declared dependency ids for `package` at its chosen version.
    ///
    /// Returns an empty vector (not an error) if the package has no loadable
    /// `Deps.toml` or no entry for its version — call [`Registry::has_loadable_deps`]
    /// to tell that case apart from a package that legitimately has zero
    /// dependencies at its version.
    pub fn dependencies_of(&self, package: &Package) -> Vec<PackageId> {
        let Some(version) = &package.version else {
            return Vec::new();
        };
        let Ok(descriptor) = self.read_deps_descriptor(package) else {
            return Vec::new();
        };
        descriptor
            .get(&version.to_string())
            .map(|deps| deps.values().copied().collect())
            .unwrap_or_default()
    }

    /// True if `package`'s `Deps.toml` was readable, parseable, and had an
    /// entry for its chosen version. A package with no version (no
    /// `Deps.toml` at all) is not considered a failure here — only a
    /// versioned package whose metadata should exist but doesn't parse.
    pub fn has_loadable_deps(&self, package: &Package) -> bool {
        let Some(version) = &package.version else {
            return true;
        };
        match self.read_deps_descriptor(package) {
            Ok(descriptor) => descriptor.contains_key(&version.to_string()),
            Err(()) => false,
        }
    }

    fn read_deps_descriptor(&self, package: &Package) -> Result<DepsDescriptor, ()> {
        let deps_path = package.metadata_path.join(DEPS_DESCRIPTOR_FILE);
        let raw = std::fs::read_to_string(&deps_path).map_err(|_| ())?;
        toml::from_str(&raw).map_err(|_| ())
    }
}

/// Read every version key out of `Deps.toml` and return the maximum one.
/// A package with no `Deps.toml`, or one with no parseable version keys, has
/// no version (it still becomes a vertex with no edges).
fn max_available_version(package_dir: &Path, name: &str) -> Result<Option<Version>> {
    let deps_path = package_dir.join(DEPS_DESCRIPTOR_FILE);
    let Ok(raw) = std::fs::read_to_string(&deps_path) else {
        return Ok(None);
    };
    let descriptor: DepsDescriptor = toml::from_str(&raw)
        .with_context(|| format!("failed to parse {} for package {name}", deps_path.display()))?;

    let max = descriptor
        .keys()
        .filter_map(|v| Version::parse(v).ok())
        .max();
    Ok(max)
}

/// Errors specific to package/registry construction beyond what `anyhow`
/// contexts already describe textually; kept as a typed enum so callers
/// (and tests) can match on the failure kind.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("dependency id {dep_id} declared by package {package} is not present in the registry or standard library")]
    UnresolvedDependency { package: String, dep_id: PackageId },
}

/// Fail fast if `dep_id` isn't a known package id; graph construction relies
/// on this to report the offending package rather than panicking deep inside
/// `petgraph`.
pub fn ensure_known(
    dep_id: PackageId,
    package_name: &str,
    known: &std::collections::HashSet<PackageId>,
) -> Result<()> {
    if known.contains(&dep_id) {
        Ok(())
    } else {
        bail!(PackageError::UnresolvedDependency {
            package: package_name.to_string(),
            dep_id,
        })
    }
}
