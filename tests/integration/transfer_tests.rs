//! Chunked transfers over both transports: progress reporting,
//! completion by size or by end marker, overshoot, aborts.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use codeloader::app::events::Status;
use codeloader::config::DeviceConfig;

use crate::mocks::{Rig, statuses};

fn data_line(bytes: &[u8]) -> String {
    format!("DATA:{}", STANDARD.encode(bytes))
}

// ── Upload to storage ─────────────────────────────────────────

#[test]
fn ble_upload_reports_progress_then_success() {
    let (rig, _) = Rig::scripted();
    let mut ble = rig.ble();
    ble.connect();

    let r = ble.command(json!({"type": "start_upload", "filename": "a.txt", "size": 10}));
    assert_eq!(statuses(&r), vec![Status::Ready]);
    assert_eq!(r[0].message, "ready to receive: a.txt");

    let r = ble.chunk(b"hello ");
    assert_eq!(statuses(&r), vec![Status::Progress]);
    assert_eq!(r[0].data_u64("received"), Some(6));
    assert_eq!(r[0].data_u64("total"), Some(10));
    assert_eq!(r[0].data_f64("progress"), Some(60.0));

    let r = ble.chunk(b"word");
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(r[0].message, "file saved: a.txt");
    assert_eq!(
        r[0].data,
        Some(json!({"filename": "a.txt", "size": 10}))
    );

    assert_eq!(rig.file("a.txt").as_deref(), Some(&b"hello word"[..]));
    assert!(!ble.session.engine().transfer().is_active());
}

#[test]
fn serial_upload_accepts_unpadded_chunks() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "start_upload", "filename": "b.py", "size": 5}));
    assert_eq!(statuses(&r), vec![Status::Ready]);

    // "ab" → "YWI=" and "cde" → "Y2Rl"; drop the padding on the first.
    let r = usb.line("DATA:YWI");
    assert_eq!(statuses(&r), vec![Status::Progress]);
    assert_eq!(r[0].data_f64("progress"), Some(40.0));

    let r = usb.line(&data_line(b"cde"));
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(rig.file("b.py").as_deref(), Some(&b"abcde"[..]));
}

#[test]
fn overshooting_chunk_completes_without_truncation() {
    let (rig, _) = Rig::scripted();
    let mut ble = rig.ble();
    ble.connect();

    ble.command(json!({"type": "start_upload", "filename": "c.txt", "size": 4}));
    let r = ble.chunk(b"abcdef");
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(r[0].data_u64("size"), Some(6));
    assert_eq!(rig.file("c.txt").as_deref(), Some(&b"abcdef"[..]));
}

#[test]
fn end_marker_completes_short_transfer() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    usb.command(json!({"type": "start_upload", "filename": "d.txt", "size": 100}));
    let r = usb.line(&data_line(b"short"));
    assert_eq!(statuses(&r), vec![Status::Progress]);
    assert_eq!(r[0].data_f64("progress"), Some(5.0));

    let r = usb.line("END");
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(r[0].data_u64("size"), Some(5));
    assert_eq!(rig.file("d.txt").as_deref(), Some(&b"short"[..]));
}

#[test]
fn zero_size_transfer_reports_zero_progress() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    usb.command(json!({"type": "start_upload", "filename": "e.txt"}));
    // Any chunk meets a declared size of zero.
    let r = usb.line(&data_line(b"x"));
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(rig.file("e.txt").as_deref(), Some(&b"x"[..]));
}

#[test]
fn no_progress_after_completion() {
    let (rig, _) = Rig::scripted();
    let mut ble = rig.ble();
    ble.connect();

    ble.command(json!({"type": "start_upload", "filename": "f.txt", "size": 2}));
    assert_eq!(statuses(&ble.chunk(b"ok")), vec![Status::Success]);

    let r = ble.chunk(b"late");
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert!(r[0].message.contains("not receiving"), "{}", r[0].message);
    assert_eq!(rig.file("f.txt").as_deref(), Some(&b"ok"[..]));
}

// ── Aborts and rejections ─────────────────────────────────────

#[test]
fn chunk_without_transfer_is_rejected() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.line(&data_line(b"stray"));
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert_eq!(r[0].message, "not receiving: no transfer in progress");
    assert!(!usb.session.engine().transfer().is_active());

    let r = usb.line("END");
    assert_eq!(statuses(&r), vec![Status::Error]);
}

#[test]
fn undecodable_chunk_aborts_transfer() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    usb.command(json!({"type": "start_upload", "filename": "g.txt", "size": 10}));
    let r = usb.line("DATA:@@@@");
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert!(r[0].message.starts_with("decode failed"), "{}", r[0].message);
    assert!(!usb.session.engine().transfer().is_active());
    assert_eq!(rig.file("g.txt"), None);
}

#[test]
fn oversized_transfer_is_aborted() {
    let config = DeviceConfig {
        max_transfer_bytes: 8,
        ..DeviceConfig::default()
    };
    let (rig, _) = Rig::scripted_with(config);
    let mut ble = rig.ble();
    ble.connect();

    ble.command(json!({"type": "start_upload", "filename": "h.bin", "size": 100}));
    assert_eq!(statuses(&ble.chunk(b"12345")), vec![Status::Progress]);

    let r = ble.chunk(b"6789");
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert_eq!(r[0].message, "transfer exceeds 8 bytes, aborted");
    assert!(!ble.session.engine().transfer().is_active());
    assert_eq!(rig.file("h.bin"), None);
}

#[test]
fn start_upload_requires_filename() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "start_upload", "size": 3}));
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert_eq!(r[0].message, "filename required");
    assert!(!usb.session.engine().transfer().is_active());
}

#[test]
fn disconnect_mid_transfer_leaves_no_residue() {
    let (rig, _) = Rig::scripted();
    let mut ble = rig.ble();
    ble.connect();

    ble.command(json!({"type": "start_upload", "filename": "i.txt", "size": 10}));
    ble.chunk(b"stale");
    ble.disconnect();
    assert!(!ble.session.engine().transfer().is_active());

    ble.connect();
    let r = ble.command(json!({"type": "start_upload", "filename": "i.txt", "size": 3}));
    assert_eq!(statuses(&r), vec![Status::Ready]);
    let r = ble.chunk(b"new");
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(rig.file("i.txt").as_deref(), Some(&b"new"[..]));
}

#[test]
fn storage_fault_on_completion_resets_transfer() {
    use std::sync::{Arc, Mutex};

    use crate::mocks::{FaultyStore, ScriptedInterpreter};

    let rig = Rig::build(
        DeviceConfig::default(),
        Arc::new(ScriptedInterpreter::default()),
        Arc::new(Mutex::new(FaultyStore::new())),
    );
    let mut ble = rig.ble();
    ble.connect();

    ble.command(json!({"type": "start_upload", "filename": "j.txt", "size": 2}));
    let r = ble.chunk(b"xy");
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert_eq!(r[0].message, "save failed: I/O error: flash write error");
    assert!(!ble.session.engine().transfer().is_active());
}

// ── Upload to execute ─────────────────────────────────────────

#[test]
fn run_transfer_executes_assembled_source() {
    let (rig, interp) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "start_run", "size": 22}));
    assert_eq!(statuses(&r), vec![Status::ReadyRun]);
    assert_eq!(r[0].message, "ready to receive code");

    let source = b"print one\nprint two\n\n";
    usb.line(&data_line(&source[..10]));
    let r = usb.line(&data_line(&source[10..]));
    assert_eq!(r[0].status, Status::Info);
    assert_eq!(r[0].message, "code starting...");
    assert!(!usb.session.engine().transfer().is_active());

    let seen = usb.wait_from(r, |r| r.status == Status::Success);
    let outputs: Vec<_> = seen
        .iter()
        .filter(|r| r.status == Status::Output)
        .map(|r| r.message.as_str())
        .collect();
    assert_eq!(outputs, vec!["one", "two"]);
    assert_eq!(
        interp.sources(),
        vec![String::from_utf8(source.to_vec()).unwrap()]
    );
}

#[test]
fn start_run_rejected_during_open_transfer() {
    let (rig, interp) = Rig::scripted();
    let mut usb = rig.serial();

    usb.command(json!({"type": "start_upload", "filename": "k.txt", "size": 10}));
    let r = usb.command(json!({"type": "start_run", "size": 4}));
    assert_eq!(statuses(&r), vec![Status::Error]);

    // The upload is still the active transfer.
    let r = usb.line(&data_line(b"0123456789"));
    assert_eq!(statuses(&r), vec![Status::Success]);
    assert_eq!(rig.file("k.txt").as_deref(), Some(&b"0123456789"[..]));
    assert_eq!(interp.runs(), 0);
}
