use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::ToolError;

/// Lines of tool output kept in a failure message.
const DETAIL_LINES: usize = 12;

/// Run `program` to completion, capturing its output.
///
/// A program that cannot be started is [`ToolError::Unavailable`]; a non-zero
/// exit whose code is not in `ok_codes` is [`ToolError::Failed`].
pub(crate) fn run<I, S>(
    tool: &str,
    program: &Path,
    args: I,
    cwd: Option<&Path>,
    ok_codes: &[i32],
) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let output = command.output().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ToolError::Unavailable {
            tool: tool.to_string(),
            reason: e.to_string(),
        },
        _ => ToolError::Io(e),
    })?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let code = output.status.code();
    if output.status.success() || code.is_some_and(|c| ok_codes.contains(&c)) {
        debug!(tool, elapsed_ms, code = ?code, "tool finished");
        return Ok(output);
    }

    let detail = tail(&output);
    warn!(tool, elapsed_ms, status = %output.status, "tool failed");
    Err(ToolError::Failed {
        tool: tool.to_string(),
        status: output.status.to_string(),
        detail,
    })
}

fn tail(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
    if text.trim().is_empty() {
        text = String::from_utf8_lossy(&output.stdout).into_owned();
    }
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(DETAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_unavailable() {
        let err = run(
            "ghost",
            Path::new("/nonexistent/bin/ghost"),
            ["--help"],
            None,
            &[],
        )
        .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn nonzero_exit_is_failure_with_detail() {
        let err = run(
            "sh",
            Path::new("/bin/sh"),
            ["-c", "echo boom >&2; exit 3"],
            None,
            &[],
        )
        .unwrap_err();
        match err {
            ToolError::Failed { tool, detail, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(detail, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn accepted_exit_codes_pass() {
        assert!(run("sh", Path::new("/bin/sh"), ["-c", "exit 3"], None, &[3]).is_ok());
    }
}
