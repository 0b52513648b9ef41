//! Program execution through a session: single-run exclusivity,
//! cancellation, terminal events and staging-file cleanup.

use std::time::Duration;

use serde_json::json;

use codeloader::app::events::Status;

use crate::mocks::{Rig, is_terminal, statuses};

// ── Exclusivity ───────────────────────────────────────────────

#[test]
fn second_run_rejected_while_running() {
    let (rig, interp) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "wait"}));
    assert_eq!(r[0].message, "code starting...");
    assert!(rig.supervisor.is_running());

    let r = usb.command(json!({"type": "run", "code": "print other"}));
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert_eq!(r[0].message, "code already running, send stop first");

    for cmd in [
        json!({"type": "start_run", "size": 4}),
        json!({"type": "start_upload", "filename": "x.lua", "size": 4}),
    ] {
        let r = usb.command(cmd);
        assert_eq!(r[0].message, "code already running, send stop first");
    }
    assert!(!usb.session.engine().transfer().is_active());

    interp.release();
    usb.wait_for(is_terminal);
    assert_eq!(interp.runs(), 1);
}

#[test]
fn run_from_another_session_is_rejected() {
    let (rig, interp) = Rig::scripted();
    let mut usb = rig.serial();
    let mut ble = rig.ble();
    ble.connect();

    usb.command(json!({"type": "run", "code": "wait"}));
    let r = ble.command(json!({"type": "run", "code": "print x"}));
    assert_eq!(statuses(&r), vec![Status::Error]);

    // Either link can stop the shared run.
    let r = ble.command(json!({"type": "stop"}));
    assert_eq!(r[0].message, "stopping...");
    rig.wait_idle();
    assert_eq!(interp.runs(), 1);
}

// ── Stop ──────────────────────────────────────────────────────

#[test]
fn stop_while_idle_is_informational() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.line("stop");
    assert_eq!(statuses(&r), vec![Status::Info]);
    assert_eq!(r[0].message, "nothing running");
}

#[test]
fn stopped_run_sends_no_terminal_event() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "print before\nwait\nprint after"}));
    usb.wait_from(r, |r| r.message == "before");

    let r = usb.command(json!({"type": "stop"}));
    assert_eq!(statuses(&r), vec![Status::Info]);
    assert_eq!(r[0].message, "stopping...");

    rig.wait_idle();
    std::thread::sleep(Duration::from_millis(20));
    usb.tick();
    let rest = usb.take();
    assert!(
        !rest.iter().any(is_terminal),
        "unexpected terminal event: {rest:?}"
    );

    // Cancellation does not outlive the run.
    let r = usb.command(json!({"type": "run", "code": "print fresh"}));
    assert_eq!(r[0].status, Status::Info);
    let seen = usb.wait_from(r, is_terminal);
    assert_eq!(seen.last().map(|r| r.status), Some(Status::Success));
}

// ── Terminal events ───────────────────────────────────────────

#[test]
fn output_in_order_then_success() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "print 1\nprint 2\nprint 3"}));
    let seen = usb.wait_from(r, is_terminal);

    let messages: Vec<_> = seen.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["code starting...", "1", "2", "3", "execution finished"]
    );
    let done = seen.last().unwrap();
    assert_eq!(done.status, Status::Success);
    assert_eq!(done.data_u64("memory_free"), Some(272 * 1024));
    assert!(!rig.supervisor.is_running());
}

#[test]
fn fault_becomes_execution_error() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "print partial\nfail boom"}));
    let seen = usb.wait_from(r, is_terminal);
    assert_eq!(seen[1].message, "partial");
    let last = seen.last().unwrap();
    assert_eq!(last.status, Status::Error);
    assert_eq!(last.message, "execution error: boom");
}

#[test]
fn running_is_cleared_before_terminal_event() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "print a"}));
    usb.wait_from(r, is_terminal);
    // A run issued right after the terminal event is never rejected.
    let r = usb.command(json!({"type": "run", "code": "print b"}));
    assert_eq!(r[0].message, "code starting...");
    usb.wait_from(r, is_terminal);
}

// ── Run by name ───────────────────────────────────────────────

#[test]
fn run_stored_file_keeps_it() {
    let (rig, interp) = Rig::scripted();
    rig.put_file("main.lua", b"print stored");
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "filename": "main.lua"}));
    assert_eq!(r[0].message, "running file: main.lua");
    let seen = usb.wait_from(r, is_terminal);
    assert!(seen.iter().any(|r| r.message == "stored"));
    assert_eq!(interp.sources(), vec!["print stored".to_owned()]);
    assert!(rig.file("main.lua").is_some());
}

#[test]
fn staging_file_removed_after_run() {
    let (rig, _) = Rig::scripted();
    rig.put_file("_temp_job.lua", b"fail bad");
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "filename": "_temp_job.lua"}));
    let seen = usb.wait_from(r, is_terminal);
    assert_eq!(seen.last().unwrap().status, Status::Error);
    assert_eq!(rig.file("_temp_job.lua"), None);
}

#[test]
fn run_missing_file_is_not_found() {
    let (rig, interp) = Rig::scripted();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "filename": "ghost.lua"}));
    assert_eq!(statuses(&r), vec![Status::Error]);
    assert_eq!(r[0].message, "file not found: ghost.lua");
    assert!(!rig.supervisor.is_running());
    assert_eq!(interp.runs(), 0);
}

#[test]
fn code_wins_over_filename() {
    let (rig, interp) = Rig::scripted();
    rig.put_file("main.lua", b"print file");
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "print inline", "filename": "main.lua"}));
    assert_eq!(r[0].message, "code starting...");
    usb.wait_from(r, is_terminal);
    assert_eq!(interp.sources(), vec!["print inline".to_owned()]);
}

#[test]
fn run_requires_code_or_filename() {
    let (rig, _) = Rig::scripted();
    let mut usb = rig.serial();
    let r = usb.command(json!({"type": "run", "code": ""}));
    assert_eq!(r[0].message, "code or filename required");
}

// ── Embedded Lua ──────────────────────────────────────────────

#[test]
fn lua_program_end_to_end() {
    let rig = Rig::lua();
    let mut ble = rig.ble();
    ble.connect();

    let r = ble.command(json!({"type": "run", "code": "for i = 1, 3 do print('line', i) end"}));
    let seen = ble.wait_from(r, is_terminal);
    let outputs: Vec<_> = seen
        .iter()
        .filter(|r| r.status == Status::Output)
        .map(|r| r.message.as_str())
        .collect();
    assert_eq!(outputs, vec!["line 1", "line 2", "line 3"]);
    assert_eq!(seen.last().unwrap().status, Status::Success);
}

#[test]
fn lua_loop_honours_stop() {
    let rig = Rig::lua();
    let mut usb = rig.serial();

    let code = "print('go')\nwhile not should_stop() do time.sleep_ms(1) end";
    let r = usb.command(json!({"type": "run", "code": code}));
    usb.wait_from(r, |r| r.message == "go");

    let r = usb.command(json!({"type": "stop"}));
    assert_eq!(r[0].message, "stopping...");
    rig.wait_idle();
}

#[test]
fn lua_error_reports_fault() {
    let rig = Rig::lua();
    let mut usb = rig.serial();

    let r = usb.command(json!({"type": "run", "code": "error('kaput')"}));
    let seen = usb.wait_from(r, is_terminal);
    let last = seen.last().unwrap();
    assert_eq!(last.status, Status::Error);
    assert!(last.message.starts_with("execution error:"), "{}", last.message);
    assert!(last.message.contains("kaput"), "{}", last.message);
}
