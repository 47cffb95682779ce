#![no_main]

use hive_client::codec::decode;
use hive_client::{GameState, StateSnapshot};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    // Whole server lines, keyword dispatch included.
    let _ = decode::<StateSnapshot>(line);

    // The STATE payload path on its own.
    let _ = StateSnapshot::decode_state(line);
});
