//! Running export commands under resource limits.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::CommandLimits;

/// Exit code recorded when a command could not run to completion.
pub const ABNORMAL_EXIT_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Applies the limits, merges stderr into stdout, then execs the command
/// passed as positional parameters.
const LIMITS_WRAPPER: &str = r#"exec 2>&1
[ -n "$DUMP_LIMIT_CPU" ] && { ulimit -t "$DUMP_LIMIT_CPU" || exit 126; }
[ -n "$DUMP_LIMIT_MEM" ] && { ulimit -v "$DUMP_LIMIT_MEM" || exit 126; }
[ -n "$DUMP_LIMIT_FSIZE" ] && { ulimit -f "$DUMP_LIMIT_FSIZE" || exit 126; }
exec "$@""#;

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub limits: CommandLimits,
}

impl CommandSpec {
    /// The command line as a shell-quoted string, for logs.
    pub fn display(&self) -> String {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words).unwrap_or_else(|_| format!("{} {}", self.program, self.args.join(" ")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Captured stdout with stderr merged in.
    pub output: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {0} seconds")]
    TimedOut(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs export commands. Blocking.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs commands through `sh`, applying limits with `ulimit`.
///
/// No sandboxing: export scripts need broad filesystem access.
#[derive(Debug, Default, Clone)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(LIMITS_WRAPPER)
            .arg("sh")
            .arg(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let limits = &spec.limits;
        if let Some(cpu) = limits.cpu_secs {
            cmd.env("DUMP_LIMIT_CPU", cpu.to_string());
        }
        if let Some(mem) = limits.memory_kb {
            cmd.env("DUMP_LIMIT_MEM", mem.to_string());
        }
        // ulimit -f counts 512-byte blocks
        if let Some(fsize) = limits.filesize_kb {
            cmd.env("DUMP_LIMIT_FSIZE", (fsize * 2).to_string());
        }
        cmd
    }
}

impl CommandRunner for ShellCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        info!("Running export command: {}", spec.display());

        let mut child = Self::build(spec).spawn().map_err(|source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Drain both pipes while waiting so a chatty command never blocks.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = spec
            .limits
            .wall_clock_secs
            .map(|secs| (secs, Instant::now() + Duration::from_secs(secs)));

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some((secs, at)) = deadline {
                if Instant::now() >= at {
                    warn!("Export command exceeded {}s, killing it", secs);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CommandError::TimedOut(secs));
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        let mut output = stdout.map(join_drain).unwrap_or_default();
        output.push_str(&stderr.map(join_drain).unwrap_or_default());
        let exit_code = exit_code_of(status);

        debug!("Export command exited with {}; output:\n{}", exit_code, output);
        Ok(CommandOutput { exit_code, output })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => ABNORMAL_EXIT_CODE,
    }
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(ABNORMAL_EXIT_CODE)
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, limits: CommandLimits) -> CommandSpec {
        CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            limits,
        }
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let out = ShellCommandRunner::new()
            .run(&sh("echo out; echo err >&2; exit 3", CommandLimits::default()))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[test]
    fn test_large_output_does_not_block() {
        let out = ShellCommandRunner::new()
            .run(&sh(
                "i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done",
                CommandLimits::default(),
            ))
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output.len(), 20000 * 11);
    }

    #[test]
    fn test_wall_clock_limit_kills_command() {
        let limits = CommandLimits {
            wall_clock_secs: Some(1),
            ..Default::default()
        };
        let result = ShellCommandRunner::new().run(&sh("sleep 5", limits));
        assert!(matches!(result, Err(CommandError::TimedOut(1))));
    }

    #[test]
    fn test_missing_program_exits_non_zero() {
        let spec = CommandSpec {
            program: "/definitely/not/a/program".to_string(),
            args: vec![],
            limits: CommandLimits::default(),
        };
        let out = ShellCommandRunner::new().run(&spec).unwrap();
        assert_ne!(out.exit_code, 0);
    }

    #[test]
    fn test_display_quotes_arguments() {
        let spec = CommandSpec {
            program: "php".to_string(),
            args: vec!["dumpBackup.php".to_string(), "--ns=0 14".to_string()],
            limits: CommandLimits::default(),
        };
        let display = spec.display();
        assert_eq!(
            shlex::split(&display).unwrap(),
            vec!["php", "dumpBackup.php", "--ns=0 14"]
        );
    }
}
