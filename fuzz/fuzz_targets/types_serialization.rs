#![no_main]

use libfuzzer_sys::fuzz_target;
use ecotest::types::FailureImpact;

fuzz_target!(|data: &[u8]| {
    let Ok(json_str) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(impact) = serde_json::from_str::<FailureImpact>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&impact) {
            if let Ok(parsed) = serde_json::from_str::<FailureImpact>(&roundtripped) {
                assert_eq!(impact.package_id, parsed.package_id);
                assert_eq!(impact.transitive_dependents, parsed.transitive_dependents);
            }
        }
    }
});
