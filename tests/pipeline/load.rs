use binpatch::config::AnalysisConfig;
use binpatch::core::disassembler::Bitness;
use binpatch::formats::pe::{Machine, ParseStatus, PeError, PeImage};
use binpatch::session::Session;
use binpatch::BinpatchError;

use crate::common::*;

#[test]
fn parses_pe32_plus_sections_and_bitness() {
    let data = PeBuilder::new(Bitness::Bits64)
        .section(".text", &MOV_RET, EXEC)
        .section(".data", &[1, 2, 3, 4], DATA)
        .build();
    let image = PeImage::parse(&data).unwrap();
    assert_eq!(image.bitness, Bitness::Bits64);
    assert_eq!(image.machine, Machine::X86_64);
    assert_eq!(image.image_base, IMAGE_BASE_64);
    assert_eq!(image.status, ParseStatus::Complete);
    assert_eq!(image.sections.len(), 2);
    assert_eq!(image.sections[0].name, ".text");
    assert!(image.sections[0].is_executable());
    assert!(image.sections[1].is_writable());
    assert!(!image.sections[1].is_executable());
    assert_eq!(image.rva_to_offset(CODE_RVA + 5), Some(CODE_OFFSET + 5));
    assert_eq!(image.offset_to_rva(CODE_OFFSET), Some(CODE_RVA));
}

#[test]
fn parses_pe32_image_base() {
    let data = pe32_with_code(&MOV_RET);
    let image = PeImage::parse(&data).unwrap();
    assert_eq!(image.bitness, Bitness::Bits32);
    assert_eq!(image.image_base, IMAGE_BASE_32);
    assert_eq!(image.entry_va(), IMAGE_BASE_32 + u64::from(CODE_RVA));
}

#[test]
fn missing_signature_is_format_error() {
    let mut data = pe64_with_code(&MOV_RET);
    data[0] = b'X';
    assert_eq!(PeImage::parse(&data).unwrap_err(), PeError::InvalidDosSignature);

    let err = Session::from_bytes(data, AnalysisConfig::default())
        .err()
        .expect("load must fail");
    assert!(matches!(err, BinpatchError::Format(_)));
}

#[test]
fn unsupported_magic_is_format_error() {
    let mut data = pe64_with_code(&MOV_RET);
    data[0x58] = 0x07;
    data[0x59] = 0x01;
    let err = Session::from_bytes(data, AnalysisConfig::default())
        .err()
        .expect("load must fail");
    assert!(matches!(err, BinpatchError::Format(_)));
}

#[test]
fn truncated_section_table_keeps_readable_sections() {
    // Three sections declared, but the file ends inside the second record.
    let mut data = pe64_with_code(&MOV_RET);
    data[0x46] = 3;
    let table = 0x58 + 0xF0;
    data.truncate(table + 40 + 10);

    let image = PeImage::parse(&data).unwrap();
    assert!(image.is_truncated());
    assert_eq!(image.sections.len(), 1);
    assert_eq!(image.sections[0].name, ".text");
    // Its raw data lies past the cut, so it clamps to nothing.
    assert!(image.sections[0].raw_range(data.len()).is_empty());
}

#[test]
fn truncated_optional_header_is_bounds_error() {
    let data = pe64_with_code(&MOV_RET);
    let err = Session::from_bytes(data[..0x60].to_vec(), AnalysisConfig::default())
        .err()
        .expect("load must fail");
    assert!(matches!(err, BinpatchError::Bounds { .. }));
}

#[test]
fn image_without_code_is_rejected() {
    let data = PeBuilder::new(Bitness::Bits64)
        .section(".data", &[0u8; 16], DATA)
        .build();
    let err = Session::from_bytes(data, AnalysisConfig::default())
        .err()
        .expect("load must fail");
    assert!(matches!(err, BinpatchError::NoExecutableSection));
}

#[test]
fn open_from_disk_respects_size_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.exe");
    std::fs::write(&path, pe64_with_code(&MOV_RET)).unwrap();

    let session = Session::open(&path, AnalysisConfig::default()).unwrap();
    assert_eq!(session.instructions().len(), 2);
    assert_eq!(session.buffer().path(), Some(path.as_path()));

    let mut tiny = AnalysisConfig::default();
    tiny.io.max_file_size = 16;
    let err = Session::open(&path, tiny).err().expect("too large");
    assert!(matches!(err, BinpatchError::Io(_)));
}

#[test]
fn config_file_drives_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("binpatch.json");
    std::fs::write(&path, r#"{ "decode": { "backend": "capstone" }, "auto_xrefs": true }"#).unwrap();
    let config = AnalysisConfig::load(&path).unwrap();

    let session = Session::from_bytes(pe64_with_code(&MOV_RET), config).unwrap();
    assert_eq!(session.instructions().len(), 2);
    assert!(session.xrefs().is_some());
}
