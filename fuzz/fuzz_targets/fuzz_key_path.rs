#![no_main]

use libfuzzer_sys::fuzz_target;
use custody_core::hd::{KeyPath, MAX_PATH_DEPTH};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(path) = s.parse::<KeyPath>() {
            assert!(path.depth() <= MAX_PATH_DEPTH);

            // Canonical form must parse back to the same path
            let canonical = path.to_string_path();
            let reparsed: KeyPath = canonical.parse().unwrap();
            assert_eq!(path, reparsed);
        }
    }
});
