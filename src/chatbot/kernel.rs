//! Rule interpreter adapter.
//!
//! The interpreter itself is an external program. [`ProcessKernel`] spawns it
//! once and talks to it over stdin/stdout, one JSON object per line:
//!
//! ```text
//! -> {"type":"set_predicate","name":"name","value":"Cathy"}
//! <- {"ok":true}
//! -> {"type":"learn","path":"std-startup.xml"}
//! <- {"ok":true}
//! -> {"type":"respond","text":"HELLO"}
//! <- {"ok":true,"response":"Hi there!"}
//! ```
//!
//! A reply with `"ok":false` carries an `"error"` string.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, ChildStdout, Command, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::chatbot::persona::Persona;

/// Directive sent after the startup file, loading the full rule set.
pub const LOAD_DIRECTIVE: &str = "LOAD AIML B";

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("startup file {0:?} not found")]
    MissingStartupFile(PathBuf),
    #[error("failed to spawn engine `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine protocol error: {0}")]
    Protocol(String),
    #[error("engine rejected request: {0}")]
    Rejected(String),
    #[error("engine process closed")]
    Closed,
}

/// A loaded rule interpreter.
#[async_trait]
pub trait Kernel: Send {
    /// Set a bot predicate. Only called during startup.
    async fn set_predicate(&mut self, name: &str, value: &str) -> Result<(), KernelError>;

    /// Load a rule file.
    async fn learn(&mut self, path: &Path) -> Result<(), KernelError>;

    /// Best-match response for `text`.
    async fn respond(&mut self, text: &str) -> Result<String, KernelError>;
}

/// Bring a fresh kernel up: persona, startup rules, then the load directive.
///
/// `startup_file` is handed to the kernel as is, so a relative path must be
/// relative to the kernel's own working directory.
/// Any failure here is fatal; a half-loaded kernel is never returned to the caller.
pub async fn load(
    kernel: &mut dyn Kernel,
    persona: &Persona,
    startup_file: &Path,
) -> Result<(), KernelError> {
    let start = Instant::now();

    for (name, value) in persona.iter() {
        kernel.set_predicate(name, value).await?;
    }
    kernel.learn(startup_file).await?;
    let reply = kernel.respond(LOAD_DIRECTIVE).await?;
    debug!("Load directive reply: {:?}", reply);

    info!(
        "Kernel loaded ({} predicates, {:?}) in {:?}",
        persona.len(),
        startup_file,
        start.elapsed()
    );
    Ok(())
}

/// How to launch the external interpreter.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Rule resources live here; relative includes in the startup file resolve against it.
    pub working_dir: PathBuf,
    /// Relative to `working_dir` unless absolute.
    pub startup_file: PathBuf,
}

impl ProcessSettings {
    /// Startup file as seen from this process, used for the pre-spawn check.
    /// The child runs inside `working_dir` and gets `startup_file` instead.
    pub fn startup_path(&self) -> PathBuf {
        self.working_dir.join(&self.startup_file)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    SetPredicate { name: String, value: String },
    Learn { path: String },
    Respond { text: String },
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

struct Job {
    request: Request,
    reply_tx: oneshot::Sender<Result<Reply, KernelError>>,
}

/// Kernel backed by a long-lived child process.
pub struct ProcessKernel {
    tx: mpsc::Sender<Job>,
}

impl ProcessKernel {
    /// Check the startup file, then spawn the interpreter.
    pub fn start(settings: &ProcessSettings) -> Result<Self, KernelError> {
        let startup_path = settings.startup_path();
        if !startup_path.is_file() {
            return Err(KernelError::MissingStartupFile(startup_path));
        }

        let mut child = Command::new(&settings.command)
            .args(&settings.args)
            .current_dir(&settings.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| KernelError::Spawn {
                command: settings.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(KernelError::Closed)?;
        let stdout = child.stdout.take().ok_or(KernelError::Closed)?;
        info!("Engine started (PID {}): {}", child.id(), settings.command);

        let (tx, rx) = mpsc::channel::<Job>(8);
        std::thread::spawn(move || {
            worker_loop(stdin, BufReader::new(stdout), rx);
            info!("Engine worker shutting down");
            if let Err(e) = child.wait() {
                warn!("Failed to reap engine process: {e}");
            }
        });

        Ok(Self { tx })
    }

    async fn call(&self, request: Request) -> Result<Reply, KernelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply_tx })
            .await
            .map_err(|_| KernelError::Closed)?;
        reply_rx.await.map_err(|_| KernelError::Closed)?
    }
}

#[async_trait]
impl Kernel for ProcessKernel {
    async fn set_predicate(&mut self, name: &str, value: &str) -> Result<(), KernelError> {
        self.call(Request::SetPredicate {
            name: name.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn learn(&mut self, path: &Path) -> Result<(), KernelError> {
        self.call(Request::Learn {
            path: path.to_string_lossy().into_owned(),
        })
        .await?;
        Ok(())
    }

    async fn respond(&mut self, text: &str) -> Result<String, KernelError> {
        let reply = self.call(Request::Respond { text: text.to_string() }).await?;
        reply
            .response
            .ok_or_else(|| KernelError::Protocol("respond reply has no response field".to_string()))
    }
}

fn worker_loop(mut stdin: ChildStdin, mut stdout: BufReader<ChildStdout>, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.blocking_recv() {
        let result = exchange(&mut stdin, &mut stdout, &job.request);
        let broken = matches!(result, Err(KernelError::Closed | KernelError::Io(_)));
        if let Err(ref e) = result {
            debug!("Engine request {:?} failed: {}", job.request, e);
        }
        if job.reply_tx.send(result).is_err() {
            warn!("Engine caller went away before reply");
        }
        if broken {
            error!("Engine pipe broken, no further requests will be served");
            break;
        }
    }
}

fn exchange(
    stdin: &mut ChildStdin,
    stdout: &mut BufReader<ChildStdout>,
    request: &Request,
) -> Result<Reply, KernelError> {
    let json = serde_json::to_string(request)
        .map_err(|e| KernelError::Protocol(format!("serialize: {e}")))?;
    stdin.write_all(json.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()?;

    let mut line = String::new();
    loop {
        line.clear();
        if stdout.read_line(&mut line)? == 0 {
            return Err(KernelError::Closed);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let reply: Reply = serde_json::from_str(line.trim()).map_err(|e| {
        let preview: String = line.chars().take(80).collect();
        KernelError::Protocol(format!("{e} ({preview})"))
    })?;

    if reply.ok {
        Ok(reply)
    } else {
        Err(KernelError::Rejected(
            reply.error.unwrap_or_else(|| "no error message".to_string()),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Shell script answering every request; `respond` gets `response`.
    fn fake_engine(response: &str, learn_reply: &str) -> String {
        format!(
            r#"while IFS= read -r line; do
  case "$line" in
    *'"type":"respond"'*) printf '%s\n' '{{"ok":true,"response":"{response}"}}' ;;
    *'"type":"learn"'*) printf '%s\n' '{learn_reply}' ;;
    *) printf '%s\n' '{{"ok":true}}' ;;
  esac
done"#
        )
    }

    fn settings(dir: &Path, script: String) -> ProcessSettings {
        ProcessSettings {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            working_dir: dir.to_path_buf(),
            startup_file: PathBuf::from("std-startup.xml"),
        }
    }

    fn dir_with_startup_file() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("std-startup.xml"), "<aiml></aiml>").unwrap();
        dir
    }

    #[test]
    fn test_missing_startup_file_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), String::new());
        s.command = "/nonexistent/engine".to_string();

        match ProcessKernel::start(&s) {
            Err(KernelError::MissingStartupFile(path)) => {
                assert!(path.ends_with("std-startup.xml"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let dir = dir_with_startup_file();
        let mut s = settings(dir.path(), String::new());
        s.command = "/nonexistent/engine".to_string();
        s.args.clear();

        assert!(matches!(ProcessKernel::start(&s), Err(KernelError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_load_and_respond() {
        let dir = dir_with_startup_file();
        let script = fake_engine("Hi there", r#"{"ok":true}"#);
        let s = settings(dir.path(), script);

        let mut kernel = ProcessKernel::start(&s).unwrap();
        load(&mut kernel, &Persona::builtin(), &s.startup_file).await.unwrap();

        assert_eq!(kernel.respond("HELLO").await.unwrap(), "Hi there");
        assert_eq!(kernel.respond("HELLO AGAIN").await.unwrap(), "Hi there");
    }

    #[tokio::test]
    async fn test_malformed_rules_abort_load() {
        let dir = dir_with_startup_file();
        let script = fake_engine("unused", r#"{"ok":false,"error":"parse error at line 3"}"#);
        let s = settings(dir.path(), script);

        let mut kernel = ProcessKernel::start(&s).unwrap();
        let err = load(&mut kernel, &Persona::builtin(), &s.startup_file)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Rejected(ref m) if m.contains("parse error")));
    }

    #[tokio::test]
    async fn test_relative_working_dir_resolves_startup_file_once() {
        // learn succeeds only if the path exists from the child's cwd
        let script = r#"while IFS= read -r line; do
  case "$line" in
    *'"type":"learn"'*)
      path=$(printf '%s' "$line" | sed 's/.*"path":"\([^"]*\)".*/\1/')
      if [ -f "$path" ]; then printf '%s\n' '{"ok":true}'
      else printf '%s\n' '{"ok":false,"error":"no such file"}'; fi ;;
    *'"type":"respond"'*) printf '%s\n' '{"ok":true,"response":"loaded"}' ;;
    *) printf '%s\n' '{"ok":true}' ;;
  esac
done"#;

        let dir = tempfile::Builder::new().prefix("rules").tempdir_in(".").unwrap();
        std::fs::write(dir.path().join("std-startup.xml"), "<aiml></aiml>").unwrap();
        let relative = dir.path().strip_prefix(".").unwrap_or(dir.path());
        assert!(relative.is_relative());

        let s = settings(relative, script.to_string());
        let mut kernel = ProcessKernel::start(&s).unwrap();
        load(&mut kernel, &Persona::builtin(), &s.startup_file).await.unwrap();
        assert_eq!(kernel.respond("HELLO").await.unwrap(), "loaded");
    }

    #[tokio::test]
    async fn test_dead_engine_errors() {
        let dir = dir_with_startup_file();
        let s = settings(dir.path(), "exit 0".to_string());

        let mut kernel = ProcessKernel::start(&s).unwrap();
        assert!(kernel.respond("hello").await.is_err());
        // worker has exited; later calls fail too
        assert!(kernel.respond("hello").await.is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_string(&Request::SetPredicate {
            name: "name".to_string(),
            value: "Cathy".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"set_predicate","name":"name","value":"Cathy"}"#);

        let json = serde_json::to_string(&Request::Respond { text: "HI".to_string() }).unwrap();
        assert_eq!(json, r#"{"type":"respond","text":"HI"}"#);
    }
}
