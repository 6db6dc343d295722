//! Stage worker dispatch.
//!
//! Workers are opaque: they get declared input paths and must produce the
//! declared output paths. The orchestrator only interprets success,
//! failure and timeout.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{Settings, WorkerSettings};
use crate::logging::JobLogger;

/// Poll interval while waiting for a worker process.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to keep collecting output after the worker has exited.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Everything a worker needs to know about one stage execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub job_id: String,
    pub stage: String,
    pub stage_dir: PathBuf,
    pub job_dir: PathBuf,
    /// Job input media.
    pub media: PathBuf,
    /// Config snapshot path.
    pub config: PathBuf,
    /// Resolved input paths by key.
    pub inputs: BTreeMap<String, PathBuf>,
    /// Expected output paths by key.
    pub outputs: BTreeMap<String, PathBuf>,
}

impl WorkerRequest {
    pub fn input(&self, key: &str) -> Option<&PathBuf> {
        self.inputs.get(key)
    }

    pub fn output(&self, key: &str) -> Option<&PathBuf> {
        self.outputs.get(key)
    }

    /// Expand `{input:<key>}`, `{output:<key>}`, `{stage_dir}`, `{job_dir}`,
    /// `{config}` and `{media}` in `arg`.
    pub fn substitute(&self, arg: &str) -> Result<String, String> {
        let mut result = String::with_capacity(arg.len());
        let mut rest = arg;

        while let Some(start) = rest.find('{') {
            result.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated placeholder in '{}'", arg))?;
            let name = &after[..end];

            let value = match name.split_once(':') {
                Some(("input", key)) => self.inputs.get(key),
                Some(("output", key)) => self.outputs.get(key),
                None => match name {
                    "stage_dir" => Some(&self.stage_dir),
                    "job_dir" => Some(&self.job_dir),
                    "config" => Some(&self.config),
                    "media" => Some(&self.media),
                    _ => None,
                },
                Some(_) => None,
            }
            .ok_or_else(|| format!("unknown placeholder '{{{}}}'", name))?;

            result.push_str(&value.to_string_lossy());
            rest = &after[end + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        message: String,
        stderr_tail: Vec<String>,
    },
    TimedOut {
        after: Duration,
        stderr_tail: Vec<String>,
    },
}

impl WorkerOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            message: message.into(),
            stderr_tail: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded)
    }

    /// One-line reason for manifests and logs. `None` on success.
    pub fn reason(&self) -> Option<String> {
        match self {
            WorkerOutcome::Succeeded => None,
            WorkerOutcome::Failed {
                exit_code: Some(code),
                message,
                ..
            } => Some(format!("exit code {}: {}", code, message)),
            WorkerOutcome::Failed { message, .. } => Some(message.clone()),
            WorkerOutcome::TimedOut { after, .. } => {
                Some(format!("timed out after {}s", after.as_secs()))
            }
        }
    }
}

/// Executes one stage.
pub trait StageWorker: Send + Sync {
    fn dispatch(&self, request: &WorkerRequest, timeout: Duration, logger: &JobLogger) -> WorkerOutcome;

    /// Short label for logs and stage metadata.
    fn describe(&self) -> String {
        "in-process".to_string()
    }
}

/// Closures are workers, mainly for scripted pipelines in tests.
impl<F> StageWorker for F
where
    F: Fn(&WorkerRequest) -> WorkerOutcome + Send + Sync,
{
    fn dispatch(&self, request: &WorkerRequest, _timeout: Duration, _logger: &JobLogger) -> WorkerOutcome {
        self(request)
    }
}

/// Runs a configured external command.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    settings: WorkerSettings,
}

impl CommandWorker {
    pub fn new(settings: WorkerSettings) -> Self {
        Self { settings }
    }
}

impl StageWorker for CommandWorker {
    fn dispatch(&self, request: &WorkerRequest, timeout: Duration, logger: &JobLogger) -> WorkerOutcome {
        let args = match self
            .settings
            .command
            .iter()
            .map(|arg| request.substitute(arg))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(args) => args,
            Err(message) => return WorkerOutcome::failed(message),
        };
        let Some((program, rest)) = args.split_first() else {
            return WorkerOutcome::failed("empty worker command");
        };

        logger.command(&args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&request.stage_dir)
            .env("SUBPIPE_JOB_ID", &request.job_id)
            .env("SUBPIPE_STAGE", &request.stage)
            .env("SUBPIPE_STAGE_DIR", &request.stage_dir)
            .env("SUBPIPE_CONFIG", &request.config)
            .envs(&self.settings.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout also reaches the worker's children.
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return WorkerOutcome::failed(format!("failed to spawn {}: {}", program, e)),
        };

        // Readers are detached: a leftover grandchild holding the pipes open
        // must not keep the dispatch waiting.
        let (lines_tx, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, false, lines_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, true, lines_tx.clone());
        }
        drop(lines_tx);

        let started = Instant::now();
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => break WorkerOutcome::Succeeded,
                Ok(Some(status)) => {
                    break WorkerOutcome::Failed {
                        exit_code: status.code(),
                        message: format!("{} exited with {}", program, status),
                        stderr_tail: Vec::new(),
                    }
                }
                Ok(None) if started.elapsed() >= timeout => {
                    logger.warn(&format!(
                        "{} exceeded {}s, killing",
                        program,
                        timeout.as_secs()
                    ));
                    kill_worker(&mut child);
                    break WorkerOutcome::TimedOut {
                        after: timeout,
                        stderr_tail: Vec::new(),
                    };
                }
                Ok(None) => match lines.recv_timeout(POLL_INTERVAL) {
                    Ok((line, is_stderr)) => logger.output_line(&line, is_stderr),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
                },
                Err(e) => {
                    kill_worker(&mut child);
                    break WorkerOutcome::failed(format!("failed to wait for {}: {}", program, e));
                }
            }
        };

        let grace_ends = Instant::now() + OUTPUT_GRACE;
        while let Ok((line, is_stderr)) =
            lines.recv_timeout(grace_ends.saturating_duration_since(Instant::now()))
        {
            logger.output_line(&line, is_stderr);
        }

        outcome.with_tail(logger.get_tail())
    }

    fn describe(&self) -> String {
        self.settings.command.first().cloned().unwrap_or_default()
    }
}

impl WorkerOutcome {
    fn with_tail(self, tail: Vec<String>) -> Self {
        match self {
            WorkerOutcome::Failed {
                exit_code, message, ..
            } => WorkerOutcome::Failed {
                exit_code,
                message,
                stderr_tail: tail,
            },
            WorkerOutcome::TimedOut { after, .. } => WorkerOutcome::TimedOut {
                after,
                stderr_tail: tail,
            },
            WorkerOutcome::Succeeded => WorkerOutcome::Succeeded,
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, is_stderr: bool, lines: Sender<(String, bool)>) {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if lines.send((line, is_stderr)).is_err() {
                break;
            }
        }
    });
}

/// Kill the worker and everything in its process group, then reap it.
fn kill_worker(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: plain syscall; a negative pid addresses the process
            // group created at spawn, which holds this worker and its children.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Stage name → worker.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn StageWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command workers for every `[workers.<stage>]` entry.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();
        for (stage, worker) in &settings.workers {
            registry.register(stage, CommandWorker::new(worker.clone()));
        }
        registry
    }

    pub fn register(&mut self, stage: impl Into<String>, worker: impl StageWorker + 'static) {
        self.workers.insert(stage.into(), Arc::new(worker));
    }

    pub fn with(mut self, stage: impl Into<String>, worker: impl StageWorker + 'static) -> Self {
        self.register(stage, worker);
        self
    }

    pub fn get(&self, stage: &str) -> Option<&Arc<dyn StageWorker>> {
        self.workers.get(stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }
}
