#![no_main]
use libfuzzer_sys::fuzz_target;

use binpatch::config::DecodeConfig;
use binpatch::disasm::iced::IcedDisassembler;
use binpatch::disasm::stream::build_stream;
use binpatch::formats::pe::PeImage;

fuzz_target!(|data: &[u8]| {
    let Ok(image) = PeImage::parse(data) else {
        return;
    };
    let config = DecodeConfig {
        max_instructions: 100_000,
        ..DecodeConfig::default()
    };
    let _ = build_stream(
        data,
        &image.sections,
        image.image_base,
        image.bitness,
        &IcedDisassembler::new(),
        &config,
    );
});
