use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

fn surge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_surge"))
}

/// Drop a fake model pair into `dir` so engine init succeeds on hosts where
/// the runtime is built in stub mode (the test environments).
fn write_model_pair(dir: &Path, name: &str) {
    std::fs::write(dir.join(format!("{name}.param")), b"7767517\n").unwrap();
    std::fs::write(dir.join(format!("{name}.bin")), b"\0\0\0\0").unwrap();
}

#[test]
fn help_lists_the_worker_flags() {
    let output = surge().arg("--help").output().expect("run surge --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--engine",
        "--mode",
        "--gpu-id",
        "--tile-size",
        "--scale",
        "--noise",
        "--quality",
        "--model-name",
        "--format",
        "--max-batch-items",
        "--batch-size",
        "--keep-alive",
        "--profiling",
        "--verbose",
    ] {
        assert!(stdout.contains(flag), "missing {flag} in help output");
    }
}

#[test]
fn unknown_engine_is_an_argument_error() {
    let output = surge()
        .args(["--engine", "waifu2x"])
        .output()
        .expect("run surge");
    assert_eq!(output.status.code(), Some(1), "unknown engines are rejected");
    assert!(!output.stderr.is_empty());
}

#[test]
fn missing_models_fail_engine_init() {
    let dir = tempfile::tempdir().unwrap();
    let output = surge()
        .args(["--mode", "stdin"])
        .args(["--model".as_ref(), dir.path().join("nope").as_os_str()])
        .stdin(Stdio::null())
        .output()
        .expect("run surge");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to initialize engine"), "{stderr}");
}

#[test]
fn file_mode_requires_input_and_output() {
    let dir = tempfile::tempdir().unwrap();
    write_model_pair(dir.path(), "up2x-denoise1x");
    let output = surge()
        .args(["--mode", "file", "--gpu-id", "-1"])
        .args(["--model".as_ref(), dir.path().as_os_str()])
        .output()
        .expect("run surge");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--input"), "{stderr}");
}

#[test]
fn empty_stdin_blob_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    write_model_pair(dir.path(), "up2x-denoise1x");
    let output = surge()
        .args(["--mode", "stdin", "--gpu-id", "-1"])
        .args(["--model".as_ref(), dir.path().as_os_str()])
        .stdin(Stdio::null())
        .output()
        .expect("run surge");
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
}

#[test]
fn keep_alive_session_honours_the_shutdown_frame() {
    let dir = tempfile::tempdir().unwrap();
    write_model_pair(dir.path(), "up2x-denoise1x");
    let mut child = surge()
        .args(["--mode", "stdin", "--keep-alive", "--gpu-id", "-1"])
        .args(["--model".as_ref(), dir.path().as_os_str()])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn surge");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(&0u32.to_le_bytes())
        .unwrap();
    let output = child.wait_with_output().expect("wait for surge");
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty(), "no response to a shutdown frame");
}
