use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::gateway::{EngineGateway, ExecutionRequest, ExecutionStatus};

/// How often a running engine program is checked for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Engine backed by an external program.
///
/// Each invocation runs `<program> [args..] <shard_id> <block_id>` to
/// completion. Exit code 0 is success; any other exit code is returned as the
/// status. A program killed by a signal reports status `-1`. A program that
/// outlives the timeout, or is still running when the engine is interrupted,
/// is killed.
#[derive(Debug)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    interrupted: AtomicBool,
    next_runner_id: AtomicU64,
}

/// Per-connection runner state for [`CommandEngine`].
#[derive(Debug)]
pub struct CommandRunner {
    id: u64,
    invocations: u64,
}

impl CommandRunner {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
            interrupted: AtomicBool::new(false),
            next_runner_id: AtomicU64::new(1),
        }
    }

    /// Arguments placed before the shard and block ids.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the program when one run takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn(&self, request: ExecutionRequest) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(request.shard_id.to_string())
            .arg(request.block_id.to_string())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }

    fn wait(&self, runner: u64, child: &mut Child) -> Result<ExitStatus> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(err) => {
                    kill(runner, child);
                    return Err(EngineError::Invoke(format!("waiting for engine program: {err}")));
                }
            }
            if self.interrupted.load(Ordering::Acquire) {
                kill(runner, child);
                return Err(EngineError::Interrupted);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    kill(runner, child);
                    return Err(EngineError::Timeout(limit));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn kill(runner: u64, child: &mut Child) {
    warn!(runner, pid = child.id(), "killing engine program");
    if let Err(err) = child.kill() {
        debug!(runner, error = %err, "engine program already gone");
    }
    // reap
    let _ = child.wait();
}

impl EngineGateway for CommandEngine {
    type Handle = CommandRunner;

    fn create(&self) -> Result<CommandRunner> {
        if self.program.as_os_str().is_empty() {
            return Err(EngineError::Create(
                "engine program path is empty".to_string(),
            ));
        }
        let id = self.next_runner_id.fetch_add(1, Ordering::Relaxed);
        debug!(runner = id, program = %self.program.display(), "created command runner");
        Ok(CommandRunner { id, invocations: 0 })
    }

    fn invoke(
        &self,
        handle: &mut CommandRunner,
        request: ExecutionRequest,
    ) -> Result<ExecutionStatus> {
        if self.interrupted.load(Ordering::Acquire) {
            return Err(EngineError::Interrupted);
        }
        let mut child = self.spawn(request)?;
        handle.invocations += 1;
        let status = self.wait(handle.id, &mut child)?;

        let code = match status.code() {
            Some(code) => code,
            None => {
                warn!(runner = handle.id, "engine program terminated by signal");
                -1
            }
        };
        Ok(ExecutionStatus(code))
    }

    fn release(&self, handle: CommandRunner) {
        debug!(
            runner = handle.id,
            invocations = handle.invocations,
            "released command runner"
        );
    }

    fn interrupt(&self) {
        debug!(program = %self.program.display(), "interrupting command engine");
        self.interrupted.store(true, Ordering::Release);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn request(shard_id: u64, block_id: u64) -> ExecutionRequest {
        ExecutionRequest { shard_id, block_id }
    }

    #[test]
    fn zero_exit_is_success() {
        let engine = CommandEngine::new("true");
        let mut runner = engine.create().unwrap();
        let status = engine.invoke(&mut runner, request(0, 0)).unwrap();
        assert!(status.is_success());
        assert_eq!(runner.invocations(), 1);
    }

    #[test]
    fn nonzero_exit_is_returned_as_status() {
        let engine = CommandEngine::new("false");
        let mut runner = engine.create().unwrap();
        let status = engine.invoke(&mut runner, request(0, 0)).unwrap();
        assert!(!status.is_success());
        assert_eq!(status.code(), 1);
    }

    #[test]
    fn shard_and_block_are_appended_to_args() {
        let engine = CommandEngine::new("sh").with_args(["-c", "exit $(($1 + $2))", "engine"]);
        let mut runner = engine.create().unwrap();
        let status = engine.invoke(&mut runner, request(2, 3)).unwrap();
        assert_eq!(status.code(), 5);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let engine = CommandEngine::new("/nonexistent/shardlink-engine");
        let mut runner = engine.create().unwrap();
        let err = engine.invoke(&mut runner, request(0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[test]
    fn empty_program_fails_create() {
        let engine = CommandEngine::new("");
        assert!(matches!(engine.create(), Err(EngineError::Create(_))));
    }

    #[test]
    fn slow_program_is_killed_at_timeout() {
        let engine = CommandEngine::new("sleep")
            .with_args(["20"])
            .with_timeout(Some(Duration::from_millis(50)));
        let mut runner = engine.create().unwrap();

        let started = Instant::now();
        let err = engine.invoke(&mut runner, request(0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn interrupt_kills_running_program() {
        let engine = Arc::new(CommandEngine::new("sleep").with_args(["20"]));
        let worker = std::thread::spawn({
            let engine = Arc::clone(&engine);
            move || {
                let mut runner = engine.create().unwrap();
                let started = Instant::now();
                let result = engine.invoke(&mut runner, request(0, 0));
                (result, started.elapsed())
            }
        });

        std::thread::sleep(Duration::from_millis(100));
        engine.interrupt();
        let (result, elapsed) = worker.join().unwrap();
        assert!(matches!(result, Err(EngineError::Interrupted)));
        assert!(elapsed < Duration::from_secs(5));

        // later invocations are refused without spawning
        let mut runner = engine.create().unwrap();
        assert!(matches!(
            engine.invoke(&mut runner, request(0, 1)),
            Err(EngineError::Interrupted)
        ));
        assert_eq!(runner.invocations(), 0);
    }

    #[test]
    fn runners_get_distinct_ids() {
        let engine = CommandEngine::new("true");
        let first = engine.create().unwrap();
        let second = engine.create().unwrap();
        assert_ne!(first.id(), second.id());
    }
}
