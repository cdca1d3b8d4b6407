//! External process invocation.
//!
//! Every `kubectl`, `helm` and `sh` call goes through [`Runner`], so the
//! command flows can be driven against a recording fake in tests.

use crate::error::{CommandError, CommandResult};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[allow(async_fn_in_trait)]
pub trait Runner {
    /// Runs `program` with `args`, feeding `stdin` if given, and captures its output.
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> CommandResult<CommandOutput>;

    /// Like [`Runner::run`], but a non-zero exit becomes an error carrying stderr verbatim.
    async fn run_checked(&self, program: &str, args: &[String], stdin: Option<&str>) -> CommandResult<String> {
        let output = self.run(program, args, stdin).await?;
        if output.success() {
            return Ok(output.stdout);
        }

        let command = command_line(program, args);
        let stderr = output.stderr.trim().to_string();
        if is_not_found(&stderr) {
            return Err(CommandError::NotFound { command, stderr });
        }
        Err(CommandError::Failed {
            command,
            code: output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr,
        })
    }
}

/// Spawns real processes through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl Runner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> CommandResult<CommandOutput> {
        let line = command_line(program, args);
        debug!(command = %line, "running");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| spawn_error(program, &line, source))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                match pipe.write_all(input.as_bytes()).await {
                    Ok(()) => {}
                    // the child exited without reading everything; its stderr says why
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                        debug!(command = %line, "stdin closed early by child");
                    }
                    Err(source) => {
                        return Err(CommandError::Spawn {
                            command: line.clone(),
                            source,
                        })
                    }
                }
                // closing stdin lets `kubectl apply -f -` see EOF
                drop(pipe);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: line.clone(),
                source,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %line, code = ?result.code, "finished");
        Ok(result)
    }
}

fn spawn_error(program: &str, line: &str, source: std::io::Error) -> CommandError {
    if source.kind() == std::io::ErrorKind::NotFound {
        CommandError::NotInstalled {
            program: program.to_string(),
        }
    } else {
        CommandError::Spawn {
            command: line.to_string(),
            source,
        }
    }
}

/// Printable form of an invocation, used in logs and error messages.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Only the API server's answer counts; client-side errors such as an
/// unknown context also say "not found" but are not about the resource.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("Error from server (NotFound)")
}

#[cfg(test)]
pub mod fake {
    //! Recording runner for tests: replays queued outputs in order.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Invocation {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<String>,
    }

    impl Invocation {
        pub fn line(&self) -> String {
            command_line(&self.program, &self.args)
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeRunner {
        calls: Mutex<Vec<Invocation>>,
        replies: Mutex<VecDeque<CommandResult<CommandOutput>>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(self, stdout: &str) -> Self {
            self.push(Ok(CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }))
        }

        pub fn fail(self, code: i32, stderr: &str) -> Self {
            self.push(Ok(CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }))
        }

        pub fn missing(self, program: &str) -> Self {
            self.push(Err(CommandError::NotInstalled {
                program: program.to_string(),
            }))
        }

        fn push(self, reply: CommandResult<CommandOutput>) -> Self {
            self.replies.lock().unwrap().push_back(reply);
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Runner for FakeRunner {
        async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> CommandResult<CommandOutput> {
            self.calls.lock().unwrap().push(Invocation {
                program: program.to_string(),
                args: args.to_vec(),
                stdin: stdin.map(str::to_string),
            });
            // unscripted calls succeed with empty output
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput {
                    code: Some(0),
                    ..Default::default()
                }))
        }
    }
}
