#![no_main]
use libfuzzer_sys::fuzz_target;

use binpatch::patch::{ByteBuffer, PatchLedger};

// First four bytes pick the offset, the rest is the patch body.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let offset = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[4..];
    let mut buffer = ByteBuffer::new(vec![0u8; 4096]);
    let mut ledger = PatchLedger::new();
    if ledger.apply(&mut buffer, offset, body, "fuzz").is_ok() {
        let json = ledger.to_json().unwrap();
        let restored = PatchLedger::from_json(&json).unwrap();
        assert_eq!(restored, ledger);
        let mut copy = ByteBuffer::new(vec![0u8; 4096]);
        restored.replay_onto(&mut copy).unwrap();
        assert_eq!(copy.as_slice(), buffer.as_slice());
    }
});
