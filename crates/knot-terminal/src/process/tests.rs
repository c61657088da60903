use super::*;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Collect everything until the exit event
async fn collect(events: &mut ProcessEvents) -> (String, String, ExitReason) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let reason = tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(ProcessEvent::Output(chunk)) => match chunk.source {
                    OutputSource::Stdout => stdout.push_str(&chunk.text()),
                    OutputSource::Stderr => stderr.push_str(&chunk.text()),
                },
                Some(ProcessEvent::Exited(reason)) => return reason,
                None => panic!("event stream ended without exit event"),
            }
        }
    })
    .await
    .expect("process did not exit in time");
    (stdout, stderr, reason)
}

async fn next_stdout_containing(events: &mut ProcessEvents, needle: &str) -> String {
    let mut seen = String::new();
    tokio::time::timeout(TIMEOUT, async {
        while !seen.contains(needle) {
            match events.recv().await {
                Some(ProcessEvent::Output(chunk)) if chunk.source == OutputSource::Stdout => {
                    seen.push_str(&chunk.text())
                }
                Some(ProcessEvent::Output(_)) => {}
                other => panic!("unexpected event: {:?}", other),
            }
        }
    })
    .await
    .expect("expected output never arrived");
    seen
}

#[tokio::test]
async fn test_echo_through_cat() {
    let (handle, mut events) = ProcessHandle::spawn(&ProcessSpec::new("cat")).unwrap();
    assert!(handle.pid().is_some());

    handle.write(b"hello\n").await.unwrap();
    let out = next_stdout_containing(&mut events, "hello").await;
    assert_eq!(out, "hello\n");

    handle.terminate();
    let (_, _, reason) = collect(&mut events).await;
    assert_eq!(reason, ExitReason::Signaled { signal: 9 });
    assert!(handle.is_exited());
}

#[tokio::test]
async fn test_stderr_and_exit_code() {
    let spec = ProcessSpec::new("sh").args(["-c", "echo out; echo oops 1>&2; exit 3"]);
    let (handle, mut events) = ProcessHandle::spawn(&spec).unwrap();

    let (stdout, stderr, reason) = collect(&mut events).await;
    assert_eq!(stdout, "out\n");
    assert_eq!(stderr, "oops\n");
    assert_eq!(reason, ExitReason::Exited { code: 3 });
    assert_eq!(reason.code(), Some(3));
    assert_eq!(handle.wait().await, reason);
}

#[tokio::test]
async fn test_exit_event_is_last_and_single() {
    let spec = ProcessSpec::new("sh").args(["-c", "exit 0"]);
    let (_handle, mut events) = ProcessHandle::spawn(&spec).unwrap();

    let (_, _, reason) = collect(&mut events).await;
    assert_eq!(reason, ExitReason::Exited { code: 0 });
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_write_after_exit_fails() {
    let spec = ProcessSpec::new("sh").args(["-c", "exit 0"]);
    let (handle, mut events) = ProcessHandle::spawn(&spec).unwrap();
    collect(&mut events).await;

    let result = handle.write(b"ls\n").await;
    assert!(matches!(result, Err(WriteError::ProcessExited)));
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let spec = ProcessSpec::new("sh").args(["-c", "exit 7"]);
    let (handle, mut events) = ProcessHandle::spawn(&spec).unwrap();
    let (_, _, reason) = collect(&mut events).await;

    handle.terminate();
    handle.terminate();
    assert_eq!(handle.exit_reason(), Some(reason));
}

#[tokio::test]
async fn test_terminate_reaches_background_children() {
    // The background sleep inherits stdout; exit is only prompt if it dies too.
    let spec = ProcessSpec::new("sh").args(["-c", "sleep 30 & echo started; wait"]);
    let (handle, mut events) = ProcessHandle::spawn(&spec).unwrap();
    next_stdout_containing(&mut events, "started").await;

    let start = std::time::Instant::now();
    handle.terminate();
    let (_, _, reason) = collect(&mut events).await;

    assert!(matches!(reason, ExitReason::Signaled { .. }));
    assert!(start.elapsed() < Duration::from_secs(3));
}

fn is_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state follows the parenthesised command name.
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok(),
    }
}

#[tokio::test]
async fn test_normal_exit_reaps_background_jobs() {
    let spec = ProcessSpec::new("sh").args(["-c", "sleep 30 >/dev/null 2>&1 & echo $!"]);
    let (_handle, mut events) = ProcessHandle::spawn(&spec).unwrap();

    let (stdout, _, reason) = collect(&mut events).await;
    assert_eq!(reason, ExitReason::Exited { code: 0 });
    let job: i32 = stdout.trim().parse().unwrap();

    tokio::time::timeout(TIMEOUT, async {
        while is_running(job) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("background job outlived its shell");
}

#[tokio::test]
async fn test_multibyte_char_across_read_boundary() {
    // 4095 ASCII bytes put the two bytes of 'é' on either side of a full read.
    let script = format!("printf '{}\\303\\251\\n'", "a".repeat(READ_CHUNK_SIZE - 1));
    let spec = ProcessSpec::new("sh").args(["-c", script.as_str()]);
    let (_handle, mut events) = ProcessHandle::spawn(&spec).unwrap();

    let mut bytes = Vec::new();
    let reason = tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(ProcessEvent::Output(chunk)) => {
                    assert!(
                        std::str::from_utf8(&chunk.data).is_ok(),
                        "chunk of {} bytes ends mid-character",
                        chunk.data.len()
                    );
                    bytes.extend_from_slice(&chunk.data);
                }
                Some(ProcessEvent::Exited(reason)) => return reason,
                None => panic!("event stream ended without exit event"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(reason, ExitReason::Exited { code: 0 });
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(text.len(), READ_CHUNK_SIZE + 2);
    assert!(text.ends_with("aé\n"));
}

#[test]
fn test_utf8_carry_holds_back_partial_sequences() {
    let mut carry = Utf8Carry::default();
    assert_eq!(carry.push(b"ab\xC3"), b"ab");
    assert_eq!(carry.push(b"\xA9c"), "éc".as_bytes());

    // Three of the four bytes of U+1F600, then the last one.
    assert!(carry.push(&[0xF0, 0x9F, 0x98]).is_empty());
    assert_eq!(carry.push(&[0x80]), "\u{1F600}".as_bytes());

    // Invalid bytes pass straight through.
    assert_eq!(carry.push(&[b'x', 0xFF]), &[b'x', 0xFF]);

    assert!(carry.push(&[0xE2, 0x82]).is_empty());
    assert_eq!(carry.finish(), &[0xE2, 0x82]);
    assert!(carry.finish().is_empty());
}

#[test]
fn test_only_broken_pipe_or_exit_drops_stdin() {
    let broken = io::Error::from(io::ErrorKind::BrokenPipe);
    let transient = io::Error::from(io::ErrorKind::WouldBlock);

    assert!(pipe_is_gone(&broken, false));
    assert!(pipe_is_gone(&transient, true));
    assert!(!pipe_is_gone(&transient, false));
}

#[tokio::test]
async fn test_working_dir_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let spec = ProcessSpec::new("sh")
        .args(["-c", "pwd; echo $KNOT_TEST_VAR"])
        .working_dir(dir.path())
        .env("KNOT_TEST_VAR", "marker-42");
    let (_handle, mut events) = ProcessHandle::spawn(&spec).unwrap();

    let (stdout, _, _) = collect(&mut events).await;
    let dir_name = dir.path().file_name().unwrap().to_string_lossy().to_string();
    assert!(stdout.contains(&dir_name), "pwd output: {}", stdout);
    assert!(stdout.contains("marker-42"));
}

#[tokio::test]
async fn test_spawn_missing_program() {
    let err = ProcessHandle::spawn(&ProcessSpec::new("/definitely/not/a/shell")).unwrap_err();
    assert!(matches!(err, SpawnError::Io { .. }));
    assert!(err.to_string().contains("/definitely/not/a/shell"));
}

#[tokio::test]
async fn test_spawn_empty_program() {
    let err = ProcessHandle::spawn(&ProcessSpec::new("  ")).unwrap_err();
    assert!(matches!(err, SpawnError::EmptyCommand));
}

#[test]
fn test_command_line_and_display() {
    let spec = ProcessSpec::new("powershell.exe").args(["-NoLogo", "-NoExit"]);
    assert_eq!(spec.command_line(), "powershell.exe -NoLogo -NoExit");

    assert_eq!(
        ExitReason::Exited { code: 0 }.to_string(),
        "exited with code 0"
    );
    assert_eq!(
        ExitReason::Signaled { signal: 9 }.to_string(),
        "terminated by signal 9"
    );
    assert_eq!(ExitReason::Signaled { signal: 9 }.code(), None);
}
