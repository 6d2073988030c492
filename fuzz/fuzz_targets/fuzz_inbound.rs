#![no_main]

use libfuzzer_sys::fuzz_target;
use custody_daemon::ipc::{parse_inbound, Body};

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        // Classification must never panic
        if let Ok(inbound) = parse_inbound(line) {
            if let Body::Request(request) = inbound.body {
                // Parsed requests re-serialize under their own tag
                let message = request.to_message("fuzz").unwrap();
                assert!(message.get(request.tag()).is_some());
            }
        }
    }
});
