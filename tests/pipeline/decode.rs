use std::cell::RefCell;

use binpatch::config::{AnalysisConfig, DecodeConfig};
use binpatch::core::disassembler::Bitness;
use binpatch::core::instruction::FlowClass;
use binpatch::core::reference::XrefKind;
use binpatch::disasm::iced::IcedDisassembler;
use binpatch::disasm::registry::BackendKind;
use binpatch::disasm::StreamBuilder;
use binpatch::formats::pe::PeImage;
use binpatch::session::Session;

use crate::common::*;

#[test]
fn mov_then_ret_decodes_to_two_instructions() {
    let session = Session::from_bytes(pe64_with_code(&MOV_RET), AnalysisConfig::default()).unwrap();
    let ins = session.instructions();
    assert_eq!(ins.len(), 2);

    assert_eq!(ins[0].address, IMAGE_BASE_64 + u64::from(CODE_RVA));
    assert_eq!(ins[0].file_offset, CODE_OFFSET);
    assert_eq!(ins[0].length, 5);
    assert_eq!(ins[0].text(), "mov eax, 1");
    assert_eq!(ins[0].bytes, MOV_RET[..5].to_vec());

    assert!(ins[1].is_return());
    assert_eq!(ins[1].flow, FlowClass::Return);
    assert_eq!(ins[1].length, 1);
    assert_eq!(ins[1].address, ins[0].end_address());
}

#[test]
fn decoding_is_deterministic() {
    let code = [
        0x55, 0x48, 0x89, 0xE5, 0x06, 0x90, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x5D, 0xC3,
    ];
    let data = pe64_with_code(&code);
    let a = Session::from_bytes(data.clone(), AnalysisConfig::default()).unwrap();
    let b = Session::from_bytes(data, AnalysisConfig::default()).unwrap();
    assert_eq!(a.instructions(), b.instructions());
    assert_eq!(a.snapshot().stats(), b.snapshot().stats());
    assert_eq!(a.snapshot().stats().resyncs, 1);
}

#[test]
fn every_executable_section_is_decoded_in_order() {
    let data = PeBuilder::new(Bitness::Bits64)
        .section(".text", &MOV_RET, EXEC)
        .section(".rdata", &[0xFF; 8], RDATA)
        .section(".stub", &[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00], EXEC)
        .build();
    let session = Session::from_bytes(data, AnalysisConfig::default()).unwrap();
    let ins = session.instructions();
    assert_eq!(ins.len(), 3);
    assert_eq!(ins[0].section_index, 0);
    assert_eq!(ins[2].section_index, 2);
    assert_eq!(ins[2].flow, FlowClass::Jump);
    assert_eq!(session.snapshot().stats().sections_decoded, 2);

    let image = session.image();
    for i in ins {
        let range = image.sections[i.section_index].raw_range(session.buffer().len());
        assert!(i.file_offset >= range.start);
        assert!(i.file_offset + i.length <= range.end);
    }
}

#[test]
fn thirty_two_bit_images_decode_in_32_bit_mode() {
    // inc eax; ret  (0x40 is a REX prefix in 64-bit mode)
    let session = Session::from_bytes(pe32_with_code(&[0x40, 0xC3]), AnalysisConfig::default())
        .unwrap();
    let ins = session.instructions();
    assert_eq!(ins.len(), 2);
    assert_eq!(ins[0].mnemonic, "inc");
    assert_eq!(ins[0].address, IMAGE_BASE_32 + u64::from(CODE_RVA));
}

fn with_backends(data: Vec<u8>) -> (Session, Session) {
    let iced = Session::from_bytes(data.clone(), AnalysisConfig::default()).unwrap();
    let mut config = AnalysisConfig::default();
    config.decode.backend = BackendKind::Capstone;
    let cap = Session::from_bytes(data, config).unwrap();
    (iced, cap)
}

fn layout(s: &Session) -> Vec<(u64, usize, FlowClass, Option<u64>)> {
    s.instructions()
        .iter()
        .map(|i| (i.address, i.length, i.flow, i.near_branch_target()))
        .collect()
}

fn xref_triples(s: &mut Session) -> Vec<(u64, u64, XrefKind)> {
    let mut out: Vec<_> = s
        .rebuild_xrefs()
        .iter()
        .map(|x| (x.source, x.target, x.kind))
        .collect();
    out.sort_by_key(|t| (t.0, t.1));
    out
}

#[rustfmt::skip]
#[test]
fn backends_agree_on_layout() {
    let code = [
        0x48, 0x8D, 0x05, 0x10, 0x00, 0x00, 0x00, // lea rax, [rip+0x10]
        0x74, 0x02,                               // je +2
        0x90, 0x90,                               // nop; nop
        0xF2, 0xE9, 0x03, 0x00, 0x00, 0x00,       // bnd jmp +3
        0x3E, 0xFF, 0xE0,                         // notrack jmp rax
        0xC2, 0x10, 0x00,                         // ret 0x10
        0xC3,                                     // ret
    ];
    let (mut iced, mut cap) = with_backends(pe64_with_code(&code));
    assert_eq!(layout(&iced), layout(&cap));
    assert_eq!(iced.instructions()[4].flow, FlowClass::Jump);
    assert_eq!(xref_triples(&mut iced), xref_triples(&mut cap));

    let kinds: Vec<_> = xref_triples(&mut cap).into_iter().map(|t| t.2).collect();
    assert!(kinds.contains(&XrefKind::Jump));
    assert!(kinds.contains(&XrefKind::CondJump));
}

#[test]
fn far_branches_produce_no_references_on_either_backend() {
    // jmp far 0x10:0x401000; ret
    let code = [0xEA, 0x00, 0x10, 0x40, 0x00, 0x10, 0x00, 0xC3];
    let (mut iced, mut cap) = with_backends(pe32_with_code(&code));
    assert_eq!(layout(&iced), layout(&cap));
    assert_eq!(cap.instructions()[0].flow, FlowClass::Jump);
    assert_eq!(cap.instructions()[0].near_branch_target(), None);
    assert!(xref_triples(&mut iced).is_empty());
    assert!(xref_triples(&mut cap).is_empty());
}

#[test]
fn progress_covers_all_executable_bytes() {
    let data = PeBuilder::new(Bitness::Bits64)
        .section(".text", &[0x90; 300], EXEC)
        .section(".text2", &[0x90; 100], EXEC)
        .build();
    let image = PeImage::parse(&data).unwrap();
    let seen = RefCell::new(Vec::new());
    let config = DecodeConfig {
        progress_step_percent: 25,
        ..DecodeConfig::default()
    };
    let decoder = IcedDisassembler::new();
    let stream = StreamBuilder::new(&decoder, image.bitness, image.image_base)
        .config(&config)
        .on_progress(|p| seen.borrow_mut().push(p))
        .build(&data, &image.sections)
        .unwrap();

    assert_eq!(stream.len(), 400);
    assert_eq!(stream.stats().bytes_total, 400);
    let seen = seen.into_inner();
    assert_eq!(seen, vec![25, 50, 75, 100]);
}
