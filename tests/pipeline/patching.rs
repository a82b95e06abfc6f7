use binpatch::config::AnalysisConfig;
use binpatch::disasm::stream::MetadataUpdate;
use binpatch::patch::{ByteBuffer, PatchLedger};
use binpatch::session::Session;
use binpatch::BinpatchError;

use crate::common::*;

fn session() -> Session {
    Session::from_bytes(pe64_with_code(&MOV_RET), AnalysisConfig::default()).unwrap()
}

#[test]
fn nop_patch_rebuilds_stream() {
    let mut s = session();
    let first = s.instructions()[0].clone();
    let before = s.snapshot();

    let patch = s
        .apply_patch(first.file_offset, &[0x90; 5], "nop out mov")
        .unwrap();
    assert_eq!(patch.original, MOV_RET[..5].to_vec());
    assert_eq!(patch.description, "nop out mov");

    let ins = s.instructions();
    assert_eq!(ins.len(), 6);
    for (i, nop) in ins[..5].iter().enumerate() {
        assert!(nop.is_nop);
        assert_eq!(nop.length, 1);
        assert_eq!(nop.address, first.address + i as u64);
    }
    assert!(ins[5].is_return());

    // Earlier snapshots are untouched.
    assert_eq!(before.len(), 2);
    assert_eq!(s.patches().len(), 1);
    assert_eq!(s.buffer().modified_ranges(), vec![CODE_OFFSET..CODE_OFFSET + 5]);
}

#[test]
fn out_of_bounds_patches_leave_buffer_unchanged() {
    let mut s = session();
    let before = s.buffer().as_slice().to_vec();
    let len = before.len();

    let err = s.apply_patch(usize::MAX, &[0x90], "negative").unwrap_err();
    assert!(matches!(err, BinpatchError::Bounds { .. }));
    let err = s.apply_patch(len, &[0x90], "at end").unwrap_err();
    assert!(matches!(err, BinpatchError::Bounds { offset, limit, .. } if offset == len && limit == len));
    let err = s.apply_patch(len - 1, &[0x90, 0x90], "straddles end").unwrap_err();
    assert!(matches!(err, BinpatchError::Bounds { .. }));
    let err = s.apply_patch(0, &[], "empty").unwrap_err();
    assert!(matches!(err, BinpatchError::InvalidInput(_)));

    assert_eq!(s.buffer().as_slice(), &before[..]);
    assert!(s.patches().is_empty());
    assert!(!s.is_stale());
    assert_eq!(s.generation(), 0);
}

#[test]
fn revert_restores_original_bytes_and_stream() {
    let mut s = session();
    let original_stream = s.instructions().to_vec();
    s.apply_patch(CODE_OFFSET, &[0xC3], "early return").unwrap();
    s.apply_patch(CODE_OFFSET + 1, &[0xCC, 0xCC], "trap").unwrap();
    assert!(s.buffer().is_dirty());

    let dropped = s.revert_all().unwrap();
    assert_eq!(dropped.len(), 2);
    assert_eq!(s.buffer().as_slice(), s.buffer().original());
    assert!(s.buffer().write_mask_ranges().is_empty());
    assert!(s.buffer().modified_bytes().is_empty());
    assert!(s.patches().is_empty());
    assert_eq!(s.instructions(), &original_stream[..]);
}

#[test]
fn writing_original_value_back_is_not_a_modification() {
    let mut s = session();
    s.apply_patch(CODE_OFFSET + 1, &[0x02], "imm 2").unwrap();
    s.apply_patch(CODE_OFFSET + 1, &[0x01], "imm 1 again").unwrap();
    assert!(s.buffer().modified_ranges().is_empty());
    assert_eq!(s.buffer().write_mask_ranges(), vec![CODE_OFFSET + 1..CODE_OFFSET + 2]);
    assert_eq!(s.patches().len(), 2);
    assert_eq!(s.buffer().digest(), s.buffer().original_digest());
}

#[test]
fn ledger_replays_onto_fresh_copy() {
    let mut s = session();
    s.apply_patch(CODE_OFFSET, &[0x31, 0xC0, 0x90, 0x90, 0x90], "xor eax, eax").unwrap();
    s.apply_patch(CODE_OFFSET + 5, &[0xCC], "trap").unwrap();

    let json = s.ledger().to_json().unwrap();
    let ledger = PatchLedger::from_json(&json).unwrap();
    let mut copy = ByteBuffer::new(pe64_with_code(&MOV_RET));
    assert_eq!(ledger.replay_onto(&mut copy).unwrap(), 2);
    assert_eq!(copy.digest(), s.buffer().digest());

    // Replaying twice conflicts on the first patch.
    let err = ledger.replay_onto(&mut copy).unwrap_err();
    assert!(matches!(err, BinpatchError::PatchConflict { offset, .. } if offset == CODE_OFFSET));
}

#[test]
fn assemble_and_patch_uses_encoder() {
    let mut s = session();
    let patch = s
        .assemble_and_patch(&TableAssembler, "ret", CODE_OFFSET, "bail")
        .unwrap();
    assert_eq!(patch.new_bytes, vec![0xC3]);
    assert!(s.instructions()[0].is_return());

    let before = s.buffer().as_slice().to_vec();
    let err = s
        .assemble_and_patch(&TableAssembler, "vzeroupper", CODE_OFFSET, "unknown")
        .unwrap_err();
    assert!(matches!(err, BinpatchError::Encode(_)));
    let err = s
        .assemble_and_patch(&TableAssembler, "nop", 0x10, "header")
        .unwrap_err();
    assert!(matches!(err, BinpatchError::InvalidInput(_)));
    assert_eq!(s.buffer().as_slice(), &before[..]);
    assert_eq!(s.patches().len(), 1);
}

#[test]
fn saved_image_reopens_with_patches_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patched.exe");
    let mut s = session();
    s.apply_patch(CODE_OFFSET, &[0x90; 5], "nop").unwrap();
    s.save_to(&path).unwrap();

    let reopened = Session::open(&path, AnalysisConfig::default()).unwrap();
    assert_eq!(reopened.instructions().len(), 6);
    assert_eq!(reopened.buffer().digest(), s.buffer().digest());
    assert!(!reopened.buffer().is_dirty());
}

#[test]
fn search_sees_current_bytes() {
    let mut s = session();
    assert_eq!(s.find_bytes(&MOV_RET), vec![CODE_OFFSET]);
    assert_eq!(s.find_pattern("B8 ?? 00 00 00 C3").unwrap(), vec![CODE_OFFSET]);
    s.apply_patch(CODE_OFFSET + 1, &[0x07], "imm 7").unwrap();
    assert!(s.find_bytes(&MOV_RET).is_empty());
    assert_eq!(s.find_pattern("B8 ?? 00 00 00 C3").unwrap(), vec![CODE_OFFSET]);
    let hits = s.find_instructions(r"^mov eax, ").unwrap();
    assert_eq!(hits.len(), 1);
    assert!(s.find_pattern("B8 ?").is_ok());
    assert!(s.find_pattern("B8 X").is_err());
}

#[test]
fn metadata_updates_do_not_touch_old_snapshots() {
    let mut s = session();
    let before = s.snapshot();
    let address = IMAGE_BASE_64 + u64::from(CODE_RVA);
    let applied = s.apply_metadata([
        MetadataUpdate {
            address,
            function_address: Some(address),
            symbol: Some("entry".into()),
            ..Default::default()
        },
        MetadataUpdate {
            address: 0xdead,
            comment: Some("nowhere".into()),
            ..Default::default()
        },
    ]);
    assert_eq!(applied, 1);
    assert_eq!(s.snapshot().function_of(address), Some(address));
    assert_eq!(s.instructions()[0].metadata.symbol.as_deref(), Some("entry"));
    assert_eq!(before.function_of(address), None);

    // A rebuild starts from fresh metadata.
    s.apply_patch(CODE_OFFSET + 1, &[0x02], "imm 2").unwrap();
    assert_eq!(s.snapshot().function_of(address), None);
}
