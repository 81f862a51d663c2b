#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use ismphot_core::config::ToolsConfig;
use ismphot_core::error::IsmError;
use ismphot_core::tools::{FiStar, Tools};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fistar_with(program: PathBuf, timeout_secs: Option<u64>) -> Tools {
    Tools::new(ToolsConfig {
        fistar: program,
        timeout_secs,
        ..ToolsConfig::default()
    })
}

fn reason(err: IsmError) -> String {
    match err {
        IsmError::ExternalTool { tool, reason } => {
            assert_eq!(tool, "fistar");
            reason
        }
        other => panic!("expected a tool failure, got {other:?}"),
    }
}

// Scripts are created and run from one test so no other test thread holds
// them open for writing while they execute.
#[test]
fn test_command_runner() {
    let dir = tempdir().unwrap();
    let frame = dir.path().join("1-000001_5.fits");
    fs::write(&frame, b"").unwrap();
    let output = dir.path().join("1-000001_5.fistar");
    let call = |tools: &Tools| {
        tools.fistar(&FiStar {
            frame: &frame,
            flux_threshold: 1000.0,
            output: &output,
        })
    };

    let writes = script(dir.path(), "writes", r##"for last; do :; done; echo "# sources" > "$last""##);
    let fails = script(
        dir.path(),
        "fails",
        r#"for last; do :; done; echo partial > "$last"; echo "bad frame" >&2; exit 3"#,
    );
    let silent = script(dir.path(), "silent", "exit 0");
    let slow = script(dir.path(), "slow", "sleep 5");

    call(&fistar_with(writes, None)).unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "# sources\n");

    let msg = reason(call(&fistar_with(fails, None)).unwrap_err());
    assert!(msg.contains("exit status 3"), "{msg}");
    assert!(msg.contains("bad frame"), "{msg}");
    assert!(!output.exists());

    let msg = reason(call(&fistar_with(silent, None)).unwrap_err());
    assert!(msg.contains("did not write"), "{msg}");

    let msg = reason(call(&fistar_with(slow, Some(1))).unwrap_err());
    assert!(msg.contains("timed out"), "{msg}");
    assert!(!output.exists());

    let msg = reason(call(&fistar_with(dir.path().join("no-such-tool"), None)).unwrap_err());
    assert!(msg.contains("could not start"), "{msg}");
}
