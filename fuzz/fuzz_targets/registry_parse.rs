#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use ecotest::package::{REGISTRY_DESCRIPTOR_FILE, Registry};
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let Ok(td) = tempdir() else {
        return;
    };

    let path = td.path().join(REGISTRY_DESCRIPTOR_FILE);
    if fs::write(path, data).is_ok() {
        let _ = Registry::load(td.path());
    }
});
