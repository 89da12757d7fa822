#![no_main]

use adad_host::registry::fuzz_registry_ops;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    fuzz_registry_ops(data);
});
