#![no_main]
use heif_coder::{CodecConfig, ContainerHandle};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = heif_coder::sniff(data);
    if let Ok(handle) = ContainerHandle::parse(data, &CodecConfig::default()) {
        let _ = handle.info();
        for item in handle.items() {
            let _ = handle.item_data(item);
        }
    }
});
