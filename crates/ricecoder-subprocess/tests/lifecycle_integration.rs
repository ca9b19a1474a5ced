//! Lifecycle and I/O tests against real `/bin/sh` children

use std::thread;
use std::time::{Duration, Instant};

use ricecoder_subprocess::{
    spawn, ProcessError, ProcessHandle, Redirect, SpawnOptions, StopSequence, Stream,
    WaitTimeout, DEFAULT_READ_SIZE,
};

fn sh(script: &str, options: &SpawnOptions) -> ProcessHandle {
    spawn(&["/bin/sh", "-c", script], options).unwrap()
}

fn read_until_eof(child: &mut ProcessHandle, stream: Stream) -> Vec<u8> {
    let mut out = Vec::new();
    let started = Instant::now();
    loop {
        match child.read(stream, DEFAULT_READ_SIZE) {
            Ok(chunk) if chunk.is_empty() => thread::sleep(Duration::from_millis(5)),
            Ok(chunk) => out.extend(chunk),
            Err(ProcessError::BrokenPipe) => return out,
            Err(e) => panic!("read failed: {e}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10), "no EOF");
    }
}

#[test]
fn test_spawn_is_running_immediately() {
    let mut child = sh("sleep 2", &SpawnOptions::new());
    assert!(child.running());
    assert!(child.pid() > 0);
    assert_eq!(child.returncode(), None);
}

#[test]
fn test_deadline_kills_on_wait() {
    let opts = SpawnOptions::new().with_deadline(Duration::from_millis(50));
    let mut child = sh("sleep 5", &opts);

    let started = Instant::now();
    let code = child.wait(WaitTimeout::Deadline).unwrap();
    assert!(code < 0, "expected a signal exit, got {code}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!child.running());
}

#[test]
fn test_deadline_enforced_by_nonblocking_poll() {
    let opts = SpawnOptions::new().with_deadline(Duration::from_millis(20));
    let mut child = sh("sleep 5", &opts);
    thread::sleep(Duration::from_millis(60));
    assert!(child.returncode().is_some());
}

#[test]
fn test_wait_deadline_without_deadline_waits_for_exit() {
    let mut child = sh("sleep 0.1; exit 7", &SpawnOptions::new());
    assert_eq!(child.wait(WaitTimeout::Deadline).unwrap(), 7);
}

#[test]
fn test_finite_wait_times_out() {
    let mut child = sh("sleep 5", &SpawnOptions::new());
    let started = Instant::now();
    assert!(matches!(
        child.wait(WaitTimeout::millis(100)),
        Err(ProcessError::TimedOut)
    ));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(child.running());
}

#[test]
fn test_env_override_reaches_child() {
    let opts = SpawnOptions::new().with_env("FOO", "bar");
    let mut child = sh("printf '%s|%s' \"$FOO\" \"$PATH\"", &opts);
    child.wait(WaitTimeout::Infinite).unwrap();

    let out = String::from_utf8(read_until_eof(&mut child, Stream::Stdout)).unwrap();
    let path = std::env::var("PATH").unwrap_or_default();
    assert_eq!(out, format!("bar|{path}"));
}

#[test]
fn test_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let expected = dir.path().canonicalize().unwrap();
    let opts = SpawnOptions::new().with_cwd(dir.path());

    let mut child = sh("pwd -P", &opts);
    assert_eq!(child.wait(WaitTimeout::Infinite).unwrap(), 0);
    let out = String::from_utf8(read_until_eof(&mut child, Stream::Stdout)).unwrap();
    assert_eq!(out.trim_end(), expected.to_str().unwrap());
}

#[test]
fn test_missing_cwd_fails_to_spawn() {
    let opts = SpawnOptions::new().with_cwd("/definitely/not/a/dir");
    let err = spawn(&["/bin/sh", "-c", "true"], &opts).unwrap_err();
    assert!(matches!(err, ProcessError::Spawn(_)));
}

#[test]
fn test_discard_streams() {
    let opts = SpawnOptions::new()
        .with_stdout(Redirect::Discard)
        .with_stderr(Redirect::Discard);
    let mut child = sh("echo lost; echo lost >&2", &opts);
    assert_eq!(child.wait(WaitTimeout::Infinite).unwrap(), 0);
    assert!(matches!(child.read_stdout(8), Err(ProcessError::BrokenPipe)));
    assert!(matches!(
        child.close_stream(Stream::Stdout),
        Err(ProcessError::BrokenPipe)
    ));
}

#[test]
fn test_inherit_stdout_has_no_pipe() {
    let opts = SpawnOptions::new().with_stdout(Redirect::Inherit);
    let mut child = spawn(&["true"], &opts).unwrap();

    assert!(matches!(child.read_stdout(16), Err(ProcessError::BrokenPipe)));
    assert_eq!(child.wait(Duration::from_secs(5)).unwrap(), 0);
}

#[test]
fn test_inherit_stdout_with_merged_stderr() {
    let opts = SpawnOptions::new()
        .with_stdout(Redirect::Inherit)
        .with_stderr(Redirect::MergeStdout);
    let mut child = spawn(&["true"], &opts).unwrap();

    assert!(matches!(child.read_stdout(16), Err(ProcessError::BrokenPipe)));
    assert!(matches!(child.read_stderr(16), Err(ProcessError::BrokenPipe)));
    assert_eq!(child.wait(Duration::from_secs(5)).unwrap(), 0);
}

#[test]
fn test_write_accepts_at_most_len() {
    // Nobody reads stdin, so the pipe fills up.
    let mut child = sh("sleep 5", &SpawnOptions::new());
    let data = vec![b'z'; 256 * 1024];

    let mut accepted = 0;
    for _ in 0..16 {
        let n = child.write(&data).unwrap();
        assert!(n <= data.len());
        accepted += n;
        if n == 0 {
            break;
        }
    }
    assert!(accepted > 0);
    assert_eq!(child.write(&[]).unwrap(), 0);
}

#[test]
fn test_write_after_child_exit_is_broken_pipe() {
    let mut child = sh("exec 0<&-; exit 0", &SpawnOptions::new());
    child.wait(WaitTimeout::Infinite).unwrap();
    assert!(matches!(child.write(b"late"), Err(ProcessError::BrokenPipe)));
    assert!(matches!(child.write(b"late"), Err(ProcessError::BrokenPipe)));
}

#[test]
fn test_release_reaps_term_ignoring_child() {
    let mut child = sh("trap '' TERM; while :; do sleep 1; done", &SpawnOptions::new());
    thread::sleep(Duration::from_millis(100));
    child.terminate().unwrap();
    assert!(child.running());

    let started = Instant::now();
    child.release();
    assert!(started.elapsed() <= StopSequence::release().max_wait() + Duration::from_millis(500));
    assert!(!child.running());
    assert!(child.returncode().unwrap() < 0);

    child.release();
}

#[tokio::test]
async fn test_wait_async() {
    let mut child = sh("sleep 0.1; exit 4", &SpawnOptions::new());
    assert!(matches!(
        child.wait_async(WaitTimeout::NONBLOCKING).await,
        Err(ProcessError::TimedOut)
    ));
    assert_eq!(child.wait_async(WaitTimeout::Infinite).await.unwrap(), 4);
}
