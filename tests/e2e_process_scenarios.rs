//! End-to-End Test Suite: child process scenarios a scripting host drives
//!
//! Each test plays the role of the host binding: it spawns through the
//! public API, polls, reads and writes, and branches on numeric codes the
//! way a script would.

use std::time::{Duration, Instant};

use ricecoder_subprocess::{
    constants::*, spawn, strerror, ProcessError, Redirect, SpawnOptions, Stream, WaitTimeout,
};

/// Echo round trip: write, close stdin, wait forever, read the echo.
#[test]
fn test_echo_round_trip() {
    let mut child = spawn(&["cat"], &SpawnOptions::new()).expect("spawn cat");
    assert!(child.running());

    let data = b"hello";
    let mut sent = 0;
    while sent < data.len() {
        sent += child.write(&data[sent..]).expect("write");
    }
    child
        .close_stream(Stream::try_from(STREAM_STDIN).unwrap())
        .expect("close stdin");

    let code = child
        .wait(WaitTimeout::from_raw(WAIT_INFINITE).unwrap())
        .expect("wait");
    assert_eq!(code, 0);

    let out = child.read(Stream::Stdout, 4096).expect("read");
    assert_eq!(out, b"hello");
}

/// A 50ms deadline on a 5 second sleep must end in a signal exit.
#[test]
fn test_deadline_scenario() {
    let options: SpawnOptions = serde_json::from_str(r#"{ "timeout": 50 }"#).unwrap();
    let mut child = spawn(&["sleep", "5"], &options).expect("spawn sleep");

    let started = Instant::now();
    let code = child
        .wait(WaitTimeout::from_raw(WAIT_DEADLINE).unwrap())
        .expect("deadline wait");
    assert_ne!(code, 0);
    assert!(code < 0);
    assert!(started.elapsed() < Duration::from_secs(3));
}

/// Unsupported redirect kinds are rejected before anything starts.
#[test]
fn test_redirect_validation() {
    for raw in [5, 6, 7, 42, -1] {
        let err = Redirect::try_from(raw).unwrap_err();
        assert_eq!(err.code(), ERROR_INVAL);
        assert!(strerror(err.code()).is_some());
    }

    let options = SpawnOptions::new().with_stdin(Redirect::MergeStdout);
    let err = spawn(&["true"], &options).unwrap_err();
    assert_eq!(err.code(), ERROR_INVAL);
}

/// Empty argument vectors never reach the OS.
#[test]
fn test_empty_argv() {
    let argv: Vec<String> = Vec::new();
    let err = spawn(&argv, &SpawnOptions::new()).unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument(_)));
}

/// Polling loop as a host would write it: `TimedOut` is the normal
/// "not yet" answer, not a failure.
#[test]
fn test_cooperative_polling_loop() {
    let mut child = spawn(
        &["/bin/sh", "-c", "sleep 0.2; echo done; echo oops >&2; exit 2"],
        &SpawnOptions::new(),
    )
    .expect("spawn sh");

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut polls = 0;
    let code = loop {
        if let Ok(chunk) = child.read_stdout(64) {
            stdout.extend(chunk);
        }
        if let Ok(chunk) = child.read_stderr(64) {
            stderr.extend(chunk);
        }
        match child.wait(WaitTimeout::NONBLOCKING) {
            Ok(code) => break code,
            Err(e) => {
                assert_eq!(e.code(), ERROR_TIMEDOUT);
                polls += 1;
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    };
    while let Ok(chunk) = child.read_stdout(64) {
        if chunk.is_empty() {
            break;
        }
        stdout.extend(chunk);
    }
    while let Ok(chunk) = child.read_stderr(64) {
        if chunk.is_empty() {
            break;
        }
        stderr.extend(chunk);
    }

    assert!(polls > 0);
    assert_eq!(code, 2);
    assert_eq!(child.returncode(), Some(2));
    assert_eq!(stdout, b"done\n");
    assert_eq!(stderr, b"oops\n");
}

/// Dropping a handle whose child ignores SIGTERM still reaps it.
#[test]
fn test_drop_reaps_stubborn_child() {
    let child = spawn(
        &["/bin/sh", "-c", "trap '' TERM; while :; do sleep 1; done"],
        &SpawnOptions::new(),
    )
    .expect("spawn sh");
    let pid = child.pid() as i32;

    let started = Instant::now();
    drop(child);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The pid is gone: reaped, not a zombie we still own.
    let gone = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err();
    assert!(gone);
}
