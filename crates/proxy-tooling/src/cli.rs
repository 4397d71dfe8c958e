//! Command-line backend.
//!
//! Drives the `gradle` executable as a child process:
//! - stdout and stderr are streamed chunk by chunk to the operation's sinks
//! - `> Task :path` and `> Configure project :path` lines become progress events
//! - the build environment model is served from `--version` output
//!
//! Build actions need an in-process tooling client and are reported as
//! unsupported.

use chrono::Utc;
use proxy_protocol::{ActionPayload, OperationType, ProgressEventKind};
use regex_lite::Regex;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::connector::{ConnectionTarget, PhasedAction, ProjectConnection, ToolingConnector};
use crate::error::{ToolingError, ToolingResult};
use crate::operation::{Operation, OperationConfig, OutputSink, ProgressNotifier};
use crate::progress::ProgressEvent;
use crate::value::{BuildEnvironmentModel, ToolingValue};

/// Model type names served by [`CommandLineConnection::fetch_model`].
pub const BUILD_ENVIRONMENT_MODELS: &[&str] = &[
    "BuildEnvironment",
    "org.gradle.tooling.model.build.BuildEnvironment",
];

/// Chunk size for streaming child output.
const CHUNK_SIZE: usize = 8 * 1024;

/// Connector that runs builds through the `gradle` command line.
#[derive(Debug, Clone, Default)]
pub struct CommandLineConnector {
    /// Explicit executable, overriding discovery.
    command: Option<PathBuf>,
}

impl CommandLineConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always use `command` instead of discovering the executable.
    pub fn with_command(command: impl Into<PathBuf>) -> Self {
        Self {
            command: Some(command.into()),
        }
    }

    /// Resolve the executable: explicit command, then `<gradle_home>/bin/gradle`,
    /// then the project's wrapper, then `gradle` on `PATH`.
    pub fn resolve_program(&self, target: &ConnectionTarget) -> ToolingResult<PathBuf> {
        if let Some(command) = &self.command {
            return Ok(command.clone());
        }

        if let Some(home) = &target.gradle_home {
            let program = home.join("bin").join(executable_name("gradle"));
            if !program.is_file() {
                return Err(ToolingError::Connection(format!(
                    "no gradle executable in installation {}",
                    home.display()
                )));
            }
            return Ok(program);
        }

        let wrapper = target.project_dir.join(executable_name("gradlew"));
        if wrapper.is_file() {
            return Ok(wrapper);
        }

        Ok(PathBuf::from(executable_name("gradle")))
    }
}

impl ToolingConnector for CommandLineConnector {
    fn connect(&self, target: &ConnectionTarget) -> ToolingResult<Box<dyn ProjectConnection>> {
        if !target.project_dir.is_dir() {
            return Err(ToolingError::Connection(format!(
                "project directory {} does not exist",
                target.project_dir.display()
            )));
        }

        if !has_build_script(&target.project_dir) {
            warn!(project = %target.project_dir.display(), "no build or settings script in project directory");
        }

        let program = self.resolve_program(target)?;
        debug!(program = %program.display(), project = %target.project_dir.display(), "connected");

        Ok(Box::new(CommandLineConnection {
            program,
            target: target.clone(),
        }))
    }
}

fn executable_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.bat", base)
    } else {
        base.to_string()
    }
}

/// A project connection backed by child processes.
#[derive(Debug)]
pub struct CommandLineConnection {
    program: PathBuf,
    target: ConnectionTarget,
}

impl CommandLineConnection {
    /// Full argument list for a run of `config`, with `default_tasks` used
    /// when the operation names none.
    pub fn command_args(&self, config: &OperationConfig, default_tasks: &[&str]) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(user_home) = &self.target.gradle_user_home {
            args.push("--gradle-user-home".to_string());
            args.push(user_home.display().to_string());
        }

        args.extend(config.arguments.iter().cloned());

        if !config.jvm_arguments.is_empty() {
            args.push(format!("-Dorg.gradle.jvmargs={}", config.jvm_arguments.join(" ")));
        }

        if config.tasks.is_empty() {
            args.extend(default_tasks.iter().map(|t| t.to_string()));
        } else {
            args.extend(config.tasks.iter().cloned());
        }

        args
    }

    fn command(&self, config: &OperationConfig, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args).current_dir(&self.target.project_dir);

        if let Some(environment) = &config.environment_variables {
            command.env_clear().envs(environment);
        }

        command
    }

    /// Run the child with streaming output and wait for it.
    fn run_streaming(&self, mut operation: Operation, default_tasks: &[&str]) -> ToolingResult<()> {
        let args = self.command_args(&operation.config, default_tasks);
        debug!(program = %self.program.display(), ?args, "starting build");

        let mut child = self
            .command(&operation.config, &args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolingError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let notifier = operation.listeners.take_progress();
        let stdout_sink = operation.listeners.standard_output.take();
        let stderr_sink = operation.listeners.standard_error.take();

        let stdout = child.stdout.take();
        let stdout_handle = thread::spawn(move || {
            if let Some(stdout) = stdout {
                pump(stdout, stdout_sink, Some(LineScanner::new(notifier)));
            }
        });

        let stderr = child.stderr.take();
        let stderr_handle = thread::spawn(move || {
            if let Some(stderr) = stderr {
                pump(stderr, stderr_sink, None);
            }
        });

        let waited = child.wait();
        let status = settle(&mut child, waited, [stdout_handle, stderr_handle])?;

        debug!(?status, "build process exited");
        if status.success() {
            Ok(())
        } else {
            Err(ToolingError::BuildFailed {
                exit_code: status.code(),
            })
        }
    }

    /// Run `--version` and capture its stdout.
    fn capture_version(&self, config: &OperationConfig) -> ToolingResult<String> {
        let mut args = Vec::new();
        if let Some(user_home) = &self.target.gradle_user_home {
            args.push("--gradle-user-home".to_string());
            args.push(user_home.display().to_string());
        }
        args.push("--version".to_string());

        let output = self
            .command(config, &args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ToolingError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolingError::BuildFailed {
                exit_code: output.status.code(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn java_home(&self, config: &OperationConfig) -> Option<PathBuf> {
        match &config.environment_variables {
            Some(environment) => environment.get("JAVA_HOME").map(PathBuf::from),
            None => std::env::var_os("JAVA_HOME").map(PathBuf::from),
        }
    }
}

impl ProjectConnection for CommandLineConnection {
    fn run_build(&mut self, operation: Operation) -> ToolingResult<ToolingValue> {
        self.run_streaming(operation, &[])?;
        Ok(ToolingValue::Unit)
    }

    fn run_tests(&mut self, operation: Operation) -> ToolingResult<ToolingValue> {
        self.run_streaming(operation, &["test"])?;
        Ok(ToolingValue::Unit)
    }

    fn fetch_model(
        &mut self,
        model_type: &str,
        operation: Operation,
    ) -> ToolingResult<ToolingValue> {
        if !BUILD_ENVIRONMENT_MODELS.contains(&model_type) {
            return Err(ToolingError::Unsupported(format!(
                "model {} is not available from the command line",
                model_type
            )));
        }

        let version_output = self.capture_version(&operation.config)?;
        let gradle_version = parse_gradle_version(&version_output).ok_or_else(|| {
            ToolingError::Model("could not read the build tool version".to_string())
        })?;

        Ok(ToolingValue::BuildEnvironment(Box::new(BuildEnvironmentModel {
            root_dir: self.target.project_dir.clone(),
            gradle_version,
            gradle_user_home: self.target.gradle_user_home.clone(),
            java_home: self.java_home(&operation.config),
            jvm_arguments: operation.config.jvm_arguments.clone(),
        })))
    }

    fn run_action(
        &mut self,
        action: &ActionPayload,
        _operation: Operation,
    ) -> ToolingResult<ToolingValue> {
        Err(ToolingError::Unsupported(format!(
            "build action {} requires an in-process tooling client",
            action.action_id
        )))
    }

    fn run_phased_action(
        &mut self,
        _phased: PhasedAction,
        _operation: Operation,
    ) -> ToolingResult<ToolingValue> {
        Err(ToolingError::Unsupported(
            "phased build actions require an in-process tooling client".to_string(),
        ))
    }
}

/// Drain the output pumps once the child is done. A failed wait kills and
/// reaps the child first so the pumps see end of file.
fn settle(
    child: &mut Child,
    waited: io::Result<ExitStatus>,
    pumps: [JoinHandle<()>; 2],
) -> ToolingResult<ExitStatus> {
    if waited.is_err() {
        warn!(pid = child.id(), "wait on build process failed, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }
    for pump in pumps {
        let _ = pump.join();
    }
    Ok(waited?)
}

/// Copy `source` to `sink` chunk by chunk, feeding `scanner` along the way.
///
/// A failing sink stops forwarding but the source keeps being drained so the
/// child never blocks on a full pipe.
fn pump<R: Read>(mut source: R, mut sink: Option<OutputSink>, mut scanner: Option<LineScanner>) {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "failed to read build output");
                break;
            }
        };
        let chunk = &buf[..n];

        if let Some(writer) = sink.as_mut() {
            if let Err(e) = writer.write_all(chunk).and_then(|_| writer.flush()) {
                warn!(error = %e, "output sink failed, discarding further output");
                sink = None;
            }
        }
        if let Some(scanner) = scanner.as_mut() {
            scanner.feed(chunk);
        }
    }

    if let Some(scanner) = scanner.as_mut() {
        scanner.finish();
    }
}

/// Turns console lines into progress events.
struct LineScanner {
    pending: Vec<u8>,
    notifier: ProgressNotifier,
}

impl LineScanner {
    fn new(notifier: ProgressNotifier) -> Self {
        Self {
            pending: Vec::new(),
            notifier,
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.scan(&line);
        }
    }

    fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.scan(&line);
        }
    }

    fn scan(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        if let Some(event) = parse_progress_line(line.trim_end()) {
            self.notifier.notify(&event);
        }
    }
}

fn task_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^> Task (:\S*)(?: (UP-TO-DATE|NO-SOURCE|SKIPPED|FROM-CACHE|FAILED))?$")
            .expect("static pattern")
    })
}

fn configure_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^> Configure project (\S+)$").expect("static pattern"))
}

/// Parse one console line into a progress event.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    if let Some(caps) = task_line_re().captures(line) {
        let path = caps.get(1)?.as_str();
        let event = match caps.get(2) {
            Some(outcome) => ProgressEvent::finished(
                OperationType::Task,
                format!("Task {}", path),
                outcome.as_str().to_ascii_lowercase(),
            ),
            None => ProgressEvent::started(OperationType::Task, format!("Task {}", path)),
        };
        return Some(event.with_description(line.trim_start_matches("> ")));
    }

    if let Some(caps) = configure_line_re().captures(line) {
        let project = caps.get(1)?.as_str();
        return Some(ProgressEvent {
            operation_type: OperationType::ProjectConfiguration,
            kind: ProgressEventKind::Start,
            display_name: format!("Configure project {}", project),
            description: line.trim_start_matches("> ").to_string(),
            event_time: Utc::now(),
            outcome: None,
        });
    }

    None
}

/// Extract the version from `gradle --version` output.
pub fn parse_gradle_version(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Gradle "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether `path` looks like a usable project directory for this backend.
pub fn has_build_script(path: &Path) -> bool {
    ["build.gradle", "build.gradle.kts", "settings.gradle", "settings.gradle.kts"]
        .iter()
        .any(|name| path.join(name).is_file())
}
