#![no_main]
use heif_coder::{Backends, CodecConfig};
use libfuzzer_sys::fuzz_target;

// No backends, so only parsing and the dimension limit run
fuzz_target!(|data: &[u8]| {
    let config = CodecConfig::default().with_strict(false).with_max_dimension(4096);
    let _ = heif_coder::decode_with(data, &config, &Backends::none());
});
