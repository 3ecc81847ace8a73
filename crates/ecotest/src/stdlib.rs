//! Enumerates the packages that ship with the runtime itself.
//!
//! Standard-library packages are always treated as pre-passed: they have no
//! registry entry, no on-disk metadata to read dependencies from, and their
//! inter-dependencies are known statically rather than discovered from a
//! `Deps.toml`. An ecosystem typically has only a handful of these, so they
//! are declared inline rather than read from disk.

use std::path::PathBuf;

use uuid::Uuid;

use crate::package::{Package, PackageId};

/// One standard-library package plus the names of the other stdlib packages
/// it depends on (resolved to ids by [`enumerate`]).
struct StdlibEntry {
    name: &'static str,
    depends_on: &'static [&'static str],
}

/// The fixed stdlib manifest. Names are deterministic, so ids are derived
/// from a stable namespace UUID rather than generated randomly — two runs
/// (and two processes) agree on the same id for "core" without coordination.
const STDLIB_NAMESPACE: Uuid = Uuid::from_bytes([
    0xec, 0x07, 0xe5, 0x70, 0x5d, 0x11, 0x4b, 0x0a, 0x9a, 0x6c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
]);

const MANIFEST: &[StdlibEntry] = &[
    StdlibEntry { name: "core", depends_on: &[] },
    StdlibEntry { name: "alloc", depends_on: &["core"] },
    StdlibEntry { name: "std", depends_on: &["core", "alloc"] },
    StdlibEntry { name: "test", depends_on: &["std"] },
];

/// Derive a stable id for a standard-library package name.
pub fn stdlib_id(name: &str) -> PackageId {
    Uuid::new_v5(&STDLIB_NAMESPACE, name.as_bytes())
}

/// The standard-library packages and the edges between them.
///
/// Returns the packages (with `registry_name: None`, `version: None`) and a
/// parallel list of `(package_id, dependency_id)` edges.
pub fn enumerate() -> (Vec<Package>, Vec<(PackageId, PackageId)>) {
    let packages = MANIFEST
        .iter()
        .map(|entry| Package {
            name: entry.name.to_string(),
            id: stdlib_id(entry.name),
            metadata_path: PathBuf::from("<stdlib>").join(entry.name),
            version: None,
            registry_name: None,
        })
        .collect();

    let edges = MANIFEST
        .iter()
        .flat_map(|entry| {
            let from = stdlib_id(entry.name);
            entry
                .depends_on
                .iter()
                .map(move |dep_name| (from, stdlib_id(dep_name)))
        })
        .collect();

    (packages, edges)
}
