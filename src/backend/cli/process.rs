//! Running one tool invocation and classifying its output.

use std::path::Path;
use std::process::Stdio;

use regex::RegexSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::interface::JobContext;
use crate::{Error, Result};

use super::params::ParameterList;

/// Lines kept for error details.
const TAIL_LINES: usize = 20;

/// Compiled output patterns of one tool.
#[derive(Debug, Clone)]
pub(crate) struct Patterns {
    password_prompt: RegexSet,
    wrong_password: RegexSet,
    corrupt: RegexSet,
    extraction_failed: RegexSet,
}

impl Patterns {
    pub(crate) fn compile(params: &ParameterList) -> Result<Self> {
        let set = |patterns: &[String]| {
            RegexSet::new(patterns).map_err(|e| Error::PluginLoadFailed {
                plugin: params.list_programs.first().cloned().unwrap_or_default(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            password_prompt: set(&params.password_prompt_patterns)?,
            wrong_password: set(&params.wrong_password_patterns)?,
            corrupt: set(&params.corrupt_archive_patterns)?,
            extraction_failed: set(&params.extraction_failed_patterns)?,
        })
    }
}

/// What one invocation reported besides its regular output.
#[derive(Debug, Default)]
pub(crate) struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub(crate) exit_code: Option<i32>,
    /// The tool asked for a password (and was stopped).
    pub(crate) password_prompt: bool,
    /// The tool rejected the password.
    pub(crate) wrong_password: bool,
    /// The tool reported damage.
    pub(crate) corrupt: bool,
    /// First line that signalled an extraction failure.
    pub(crate) failure: Option<String>,
    /// Last lines of combined output.
    pub(crate) tail: Vec<String>,
}

impl ProcessOutput {
    pub(crate) fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub(crate) fn details(&self) -> String {
        self.tail.join("\n")
    }

    fn remember(&mut self, line: &str) {
        if self.tail.len() == TAIL_LINES {
            self.tail.remove(0);
        }
        self.tail.push(line.to_string());
    }

    fn classify(&mut self, patterns: &Patterns, line: &str) {
        if patterns.password_prompt.is_match(line) {
            self.password_prompt = true;
        }
        if patterns.wrong_password.is_match(line) {
            self.wrong_password = true;
        }
        if patterns.corrupt.is_match(line) {
            self.corrupt = true;
        }
        if self.failure.is_none() && patterns.extraction_failed.is_match(line) {
            self.failure = Some(line.to_string());
        }
    }
}

fn decode(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Runs `program` with `args` and feeds every stdout line to `on_line`.
///
/// The process gets no stdin, so an interactive prompt ends the tool
/// instead of blocking it; the prompt is still detected from its output and
/// the process is killed. Killing the job kills the process.
pub(crate) async fn run(
    program: &Path,
    args: &[String],
    working_dir: Option<&Path>,
    patterns: &Patterns,
    ctx: &JobContext,
    mut on_line: impl FnMut(&str) -> Result<()>,
) -> Result<ProcessOutput> {
    log::debug!("running {} {}", program.display(), redact(args).join(" "));

    let mut command = Command::new(program);
    command
        .args(args)
        .env("LC_ALL", "C")
        .env("LANG", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(|e| Error::PluginLoadFailed {
        plugin: program.display().to_string(),
        reason: e.to_string(),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::failed("tool stdout unavailable"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::failed("tool stderr unavailable"))?;
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');

    let mut output = ProcessOutput::default();
    let (mut out_done, mut err_done) = (false, false);
    let cancel = ctx.cancel_token().clone();

    while !(out_done && err_done) {
        let (line, from_stdout) = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            segment = stdout.next_segment(), if !out_done => match segment? {
                Some(bytes) => (decode(bytes), true),
                None => {
                    out_done = true;
                    continue;
                }
            },
            segment = stderr.next_segment(), if !err_done => match segment? {
                Some(bytes) => (decode(bytes), false),
                None => {
                    err_done = true;
                    continue;
                }
            },
        };

        output.remember(&line);
        let was_prompt = output.password_prompt;
        output.classify(patterns, &line);
        if output.password_prompt && !was_prompt {
            log::debug!("password prompt detected, stopping {}", program.display());
            let _ = child.start_kill();
        }
        if from_stdout && !output.password_prompt {
            if let Err(e) = on_line(&line) {
                let _ = child.kill().await;
                return Err(e);
            }
        }
    }

    let status = child.wait().await?;
    output.exit_code = status.code();
    log::debug!("{} exited with {:?}", program.display(), output.exit_code);
    Ok(output)
}

/// Hides password switches when logging a command line.
fn redact(args: &[String]) -> Vec<String> {
    let mut hide_next = false;
    args.iter()
        .map(|arg| {
            if std::mem::take(&mut hide_next) {
                return "******".to_string();
            }
            if arg == "-password" {
                hide_next = true;
                return arg.clone();
            }
            match arg.strip_prefix("-p").or_else(|| arg.strip_prefix("-hp")) {
                Some(rest) if !rest.is_empty() && rest != "-" => {
                    let switch = &arg[..arg.len() - rest.len()];
                    format!("{switch}******")
                }
                _ => arg.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cli::params::strings;

    fn patterns() -> Patterns {
        Patterns::compile(&ParameterList {
            password_prompt_patterns: strings(&["Enter password"]),
            wrong_password_patterns: strings(&["password is incorrect", "wrong password"]),
            corrupt_archive_patterns: strings(&["Unexpected end of archive"]),
            extraction_failed_patterns: strings(&["^ERROR: "]),
            ..ParameterList::default()
        })
        .unwrap()
    }

    #[test]
    fn test_classify_lines() {
        let p = patterns();
        let mut out = ProcessOutput::default();
        out.classify(&p, "Enter password (will not be echoed) for a.rar: ");
        out.classify(&p, "Unexpected end of archive");
        out.classify(&p, "ERROR: disk full");
        out.classify(&p, "ERROR: second");
        assert!(out.password_prompt);
        assert!(!out.wrong_password);
        assert!(out.corrupt);
        assert_eq!(out.failure.as_deref(), Some("ERROR: disk full"));
    }

    #[test]
    fn test_tail_is_bounded() {
        let mut out = ProcessOutput::default();
        for i in 0..50 {
            out.remember(&i.to_string());
        }
        assert_eq!(out.tail.len(), TAIL_LINES);
        assert_eq!(out.tail[0], "30");
    }

    #[test]
    fn test_invalid_pattern_is_plugin_error() {
        let err = Patterns::compile(&ParameterList {
            corrupt_archive_patterns: strings(&["("]),
            ..ParameterList::default()
        })
        .unwrap_err();
        assert!(err.is_plugin_error());
    }

    #[test]
    fn test_redact() {
        let args = strings(&["x", "-p-", "-psecret", "-hpsecret", "-password", "secret", "a.rar"]);
        assert_eq!(
            redact(&args),
            strings(&["x", "-p-", "-p******", "-hp******", "-password", "******", "a.rar"])
        );
    }

    #[test]
    fn test_decode_strips_carriage_return() {
        assert_eq!(decode(b"line\r".to_vec()), "line");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_collects_lines_and_exit_code() {
        let (ctx, _rx) = JobContext::detached();
        let args = strings(&["-c", "echo one; echo two; echo 'Unexpected end of archive' >&2; exit 3"]);
        let mut lines = Vec::new();
        let out = run(Path::new("sh"), &args, None, &patterns(), &ctx, |l| {
            lines.push(l.to_string());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.corrupt);
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cancelled() {
        let (ctx, _rx) = JobContext::detached();
        ctx.cancel_token().cancel();
        let args = strings(&["-c", "sleep 30"]);
        let err = run(Path::new("sh"), &args, None, &patterns(), &ctx, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let (ctx, _rx) = JobContext::detached();
        let err = run(
            Path::new("/nonexistent/archivist-tool"),
            &[],
            None,
            &patterns(),
            &ctx,
            |_| Ok(()),
        )
        .await
        .unwrap_err();
        assert!(err.is_plugin_error());
    }
}
