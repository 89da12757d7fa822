#![no_main]

use adad_protocol::fuzz_parse_descriptor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    fuzz_parse_descriptor(data);
});
