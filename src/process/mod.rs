// Process spawning seam for container CLI invocations.
// Real implementation uses std::process with piped stdout/stderr; the mock
// replays scripted output for tests.

pub mod docker;

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// Trait for launching external commands.
pub trait CommandSpawner: Send + Sync {
    fn spawn(&self, argv: &[String]) -> anyhow::Result<Box<dyn RunningProcess>>;
}

/// A launched process whose combined output is consumed line by line.
pub trait RunningProcess: Send {
    /// Next line from stdout or stderr in arrival order, `None` once both
    /// streams are closed. Blocks until a line is available.
    fn next_line(&mut self) -> io::Result<Option<String>>;
    /// Wait for exit and return the exit code (`-1` when killed by a signal).
    fn wait(&mut self) -> io::Result<i32>;
}

// --- Real implementation ---

pub struct SystemSpawner;

impl CommandSpawner for SystemSpawner {
    fn spawn(&self, argv: &[String]) -> anyhow::Result<Box<dyn RunningProcess>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Empty command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()?;

        // One reader thread per stream; both feed the same channel so lines
        // arrive interleaved in the order they were produced.
        let (line_tx, line_rx) = mpsc::channel::<io::Result<String>>();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx.clone());
        }
        drop(line_tx);

        Ok(Box::new(SystemProcess { child, line_rx }))
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<io::Result<String>>) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
}

struct SystemProcess {
    child: std::process::Child,
    line_rx: mpsc::Receiver<io::Result<String>>,
}

impl RunningProcess for SystemProcess {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        match self.line_rx.recv() {
            Ok(Ok(line)) => Ok(Some(line)),
            Ok(Err(e)) => Err(e),
            // Both reader threads finished.
            Err(_) => Ok(None),
        }
    }

    fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }
}

// --- Mock implementation for testing ---

/// Scripted result for commands matched by a [`MockSpawner`] rule.
#[derive(Clone, Debug, Default)]
pub struct MockOutcome {
    pub output: Vec<String>,
    pub exit_code: i32,
    pub spawn_error: Option<String>,
}

impl MockOutcome {
    pub fn ok(output: &[&str]) -> Self {
        Self {
            output: output.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn exit(exit_code: i32, output: &[&str]) -> Self {
        Self {
            output: output.iter().map(|s| s.to_string()).collect(),
            exit_code,
            spawn_error: None,
        }
    }
}

/// Mock spawner: the first rule whose needle occurs in the joined argv
/// decides the outcome; unmatched commands print `done: <argv>` and exit 0.
/// Every spawned argv is recorded.
#[derive(Clone, Default)]
pub struct MockSpawner {
    rules: Vec<(String, MockOutcome)>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, outcome: MockOutcome) -> Self {
        self.rules.push((needle.to_string(), outcome));
        self
    }

    /// Argv of every spawned command, in spawn order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CommandSpawner for MockSpawner {
    fn spawn(&self, argv: &[String]) -> anyhow::Result<Box<dyn RunningProcess>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(argv.to_vec());

        let joined = argv.join(" ");
        let outcome = self
            .rules
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| MockOutcome {
                output: vec![format!("done: {}", joined)],
                ..Default::default()
            });

        if let Some(error) = outcome.spawn_error {
            return Err(anyhow::anyhow!(error));
        }

        Ok(Box::new(MockProcess {
            lines: outcome.output.into_iter(),
            exit_code: outcome.exit_code,
        }))
    }
}

pub struct MockProcess {
    lines: std::vec::IntoIter<String>,
    exit_code: i32,
}

impl RunningProcess for MockProcess {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.next())
    }

    fn wait(&mut self) -> io::Result<i32> {
        Ok(self.exit_code)
    }
}
