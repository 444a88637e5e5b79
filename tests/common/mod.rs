use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

/// Marker the session prints on stderr once its listener is bound.
const READY_MARKER: &str = "UI available at http://localhost:";

/// Isolated home directory for one test: the spawned binary resolves
/// `$HOME`, `$XDG_CONFIG_HOME`, and its browser opener inside this sandbox.
pub struct TestHome {
    dir: tempfile::TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp home");

        // Shim the platform browser openers so sessions never reach a real one.
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        for name in ["xdg-open", "open"] {
            let shim = bin.join(name);
            fs::write(&shim, "#!/bin/sh\nexit 0\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&shim, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `<home>/.config/open-plan-annotator`, where the binary keeps its state.
    pub fn app_dir(&self) -> PathBuf {
        self.path().join(".config").join("open-plan-annotator")
    }

    pub fn history_root(&self) -> PathBuf {
        self.app_dir().join("history")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.app_dir().join("preferences.json")
    }

    /// `$HOME/.claude/plans`, scanned when a hook event carries no plan.
    pub fn plans_dir(&self) -> PathBuf {
        self.path().join(".claude").join("plans")
    }

    fn command(&self, env: &[(&str, &str)]) -> Command {
        let shimmed_path = format!(
            "{}:{}",
            self.path().join("bin").display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_open-plan-annotator"));
        cmd.env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join(".config"))
            .env("PATH", shimmed_path)
            .env_remove("NODE_ENV")
            .env_remove("OPEN_PLAN_ANNOTATOR_HOST")
            .env_remove("OPEN_PLAN_PKG_MANAGER")
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run the binary to completion without expecting it to serve the UI.
    /// For invocations that exit immediately: parse failures, `--version`.
    pub fn run_once(&self, stdin_text: &str, env: &[(&str, &str)]) -> (i32, String, String) {
        let mut child = self.command(env).spawn().expect("failed to spawn binary");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(stdin_text.as_bytes())
            .unwrap();
        let output = child.wait_with_output().unwrap();
        (
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        )
    }

    /// Spawn a review session and block until its UI is reachable.
    pub fn spawn_session(&self, stdin_text: &str, env: &[(&str, &str)]) -> Session {
        let mut child = self.command(env).spawn().expect("failed to spawn binary");
        child
            .stdin
            .take()
            .unwrap()
            .write_all(stdin_text.as_bytes())
            .unwrap();

        let mut reader = BufReader::new(child.stderr.take().unwrap());
        let mut early_stderr = String::new();
        let port = loop {
            let mut line = String::new();
            if reader.read_line(&mut line).expect("reading session stderr") == 0 {
                let _ = child.kill();
                panic!("session exited before announcing its UI; stderr:\n{early_stderr}");
            }
            early_stderr.push_str(&line);
            if let Some(idx) = line.find(READY_MARKER) {
                break line[idx + READY_MARKER.len()..]
                    .trim()
                    .parse::<u16>()
                    .expect("readiness line had no port");
            }
        };

        // Keep draining stderr so the child never blocks on a full pipe.
        let stderr_tail = thread::spawn(move || {
            let mut rest = String::new();
            let _ = reader.read_to_string(&mut rest);
            rest
        });

        Session {
            child,
            port,
            early_stderr,
            stderr_tail,
        }
    }
}

/// A live review session: the binary is serving its UI and waiting for a
/// decision over HTTP.
pub struct Session {
    child: Child,
    pub port: u16,
    early_stderr: String,
    stderr_tail: thread::JoinHandle<String>,
}

impl Session {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// Wait for the session to exit and collect its streams. Blocks through
    /// the session's post-decision grace period.
    pub fn finish(self) -> SessionOutput {
        let Session {
            child,
            early_stderr,
            stderr_tail,
            ..
        } = self;
        let output = child.wait_with_output().expect("waiting for session exit");
        let tail = stderr_tail.join().expect("stderr reader panicked");
        SessionOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: format!("{early_stderr}{tail}"),
        }
    }
}

pub struct SessionOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A transcript path no other test shares, isolating history keys.
pub fn unique_transcript() -> String {
    format!("/tmp/transcripts/{}.jsonl", uuid::Uuid::new_v4())
}

/// A Claude Code PermissionRequest hook event carrying `plan`.
pub fn hook_event(plan: &str, transcript_path: &str) -> String {
    serde_json::json!({
        "session_id": "test-session",
        "transcript_path": transcript_path,
        "cwd": "/tmp",
        "hook_event_name": "PermissionRequest",
        "tool_name": "ExitPlanMode",
        "tool_input": { "plan": plan }
    })
    .to_string()
}

/// An OpenCode `submit_plan` tool call.
pub fn tool_call_event(plan: &str, session_id: &str) -> String {
    serde_json::json!({
        "command": "submit_plan",
        "plan": plan,
        "sessionId": session_id,
        "cwd": "/tmp"
    })
    .to_string()
}
