use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use binpatch::config::AnalysisConfig;
use binpatch::session::{rebuild_in_background, Session};
use binpatch::BinpatchError;

use crate::common::*;

fn session() -> Session {
    Session::from_bytes(pe64_with_code(&MOV_RET), AnalysisConfig::default()).unwrap()
}

#[tokio::test]
async fn background_rebuild_installs_current_generation() {
    let mut s = session();
    s.write_bytes(CODE_OFFSET, &[0x90; 5]);
    assert!(s.is_stale());
    assert_eq!(s.instructions().len(), 2);

    let job = s.rebuild_job();
    assert_eq!(job.generation, s.generation());
    let rebuilt = rebuild_in_background(job, Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert_eq!(rebuilt.stream.len(), 6);

    assert!(s.install_rebuilt(rebuilt));
    assert!(!s.is_stale());
    assert_eq!(s.instructions().len(), 6);
    assert!(s.index().is_valid());
    assert_eq!(s.offset_to_instruction_index(CODE_OFFSET + 5), Some(5));
}

#[tokio::test]
async fn outdated_rebuild_is_discarded() {
    let mut s = session();
    s.write_byte(CODE_OFFSET + 5, 0xCC);
    let job = s.rebuild_job();
    s.write_byte(CODE_OFFSET + 5, 0xC3);

    let rebuilt = rebuild_in_background(job, Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    assert!(!s.install_rebuilt(rebuilt));
    assert!(s.is_stale());
    assert!(s.instructions()[1].is_return());
}

#[tokio::test]
async fn raised_cancel_flag_aborts_rebuild() {
    let s = session();
    let cancel = Arc::new(AtomicBool::new(true));
    let err = rebuild_in_background(s.rebuild_job(), cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, BinpatchError::Cancelled));
    assert!(cancel.load(Ordering::Relaxed));
}

#[tokio::test]
async fn capstone_job_runs_off_thread() {
    let config = AnalysisConfig::from_json_str(r#"{ "decode": { "backend": "capstone" } }"#).unwrap();
    let s = Session::from_bytes(pe64_with_code(&MOV_RET), config).unwrap();
    let rebuilt = rebuild_in_background(s.rebuild_job(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap();
    let layout = |list: &[binpatch::core::instruction::Instruction]| {
        list.iter().map(|i| (i.address, i.length)).collect::<Vec<_>>()
    };
    assert_eq!(layout(rebuilt.stream.instructions()), layout(s.instructions()));
}
