//! C2 — process supervisor. Spawns child commands and delivers their
//! stdout/stderr in line mode, in per-process emission order (§4.2).
//!
//! Reading never blocks the event-loop thread: each child's stdout and
//! stderr are read by a future scheduled on the calloop async executor
//! (`calloop::futures`), which cooperatively yields to the reactor thread
//! `async-process`/`async-io` already run for blocking syscalls. Decoded
//! lines are posted back to the loop through a `calloop::channel`, exactly
//! like the teacher's single `rx_channel` for config IPC messages.

use std::collections::HashMap;

use calloop::channel::Sender;
use calloop::futures::Scheduler;
use futures_lite::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::CoreError;
use crate::slab::{Key, Slab};

pub type ProcessKey = Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

pub enum ProcessEvent {
    Line {
        process: ProcessKey,
        stream: Stream,
        line: String,
    },
    Exited {
        process: ProcessKey,
    },
}

pub struct SpawnOptions {
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            envs: Vec::new(),
        }
    }
}

struct ProcessEntry {
    child: async_process::Child,
    alive: bool,
}

/// Owns every live child process. One instance per channel process, shared
/// by plugin instances (§3 invariant 2: every process handle belongs to
/// exactly one plugin instance — enforced by the registry, not here).
#[derive(Default)]
pub struct ProcessSupervisor {
    processes: Slab<ProcessEntry>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(
        &mut self,
        cmd: &str,
        options: SpawnOptions,
        sender: Sender<ProcessEvent>,
        scheduler: &Scheduler<()>,
    ) -> Result<ProcessKey, CoreError> {
        let mut command = async_process::Command::new(cmd);
        command
            .args(&options.args)
            .envs(options.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(async_process::Stdio::piped())
            .stdout(async_process::Stdio::piped())
            .stderr(async_process::Stdio::piped());

        let mut child = command.spawn().map_err(CoreError::SpawnFailed)?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let key = self.processes.insert(ProcessEntry {
            child,
            alive: true,
        });

        spawn_line_reader(key, Stream::Stdout, stdout, sender.clone(), scheduler);
        spawn_line_reader(key, Stream::Stderr, stderr, sender, scheduler);

        Ok(key)
    }

    pub fn write(&mut self, process: ProcessKey, bytes: &[u8]) -> Result<(), CoreError> {
        let entry = self.entry_mut(process)?;
        let Some(stdin) = entry.child.stdin.as_mut() else {
            return Ok(());
        };
        futures_lite::future::block_on(stdin.write_all(bytes))
            .map_err(|err| CoreError::ScriptError(format!("write to process failed: {err}")))
    }

    pub fn writeln(&mut self, process: ProcessKey, line: &str) -> Result<(), CoreError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.write(process, &bytes)
    }

    /// SIGKILLs the process. A no-op if it is already dead (§4.2).
    pub fn kill(&mut self, process: ProcessKey) {
        let Some(entry) = self.processes.get_mut(process) else {
            return;
        };
        if !entry.alive {
            return;
        }
        let _ = entry.child.kill();
        entry.alive = false;
    }

    pub fn mark_exited(&mut self, process: ProcessKey) {
        if let Some(entry) = self.processes.get_mut(process) {
            entry.alive = false;
        }
    }

    pub fn is_alive(&self, process: ProcessKey) -> bool {
        self.processes.get(process).map(|e| e.alive).unwrap_or(false)
    }

    pub fn kill_all(&mut self) {
        let keys: Vec<_> = self.processes.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.kill(key);
        }
    }

    fn entry_mut(&mut self, process: ProcessKey) -> Result<&mut ProcessEntry, CoreError> {
        self.processes
            .get_mut(process)
            .ok_or_else(|| CoreError::NotFound("process".into()))
    }
}

fn spawn_line_reader(
    key: ProcessKey,
    stream: Stream,
    pipe: impl futures_lite::io::AsyncRead + Unpin + Send + 'static,
    sender: Sender<ProcessEvent>,
    scheduler: &Scheduler<()>,
) {
    let task = async move {
        let mut reader = BufReader::new(pipe).lines();
        while let Some(line) = futures_lite::StreamExt::next(&mut reader).await {
            let Ok(mut line) = line else { break };
            if line.ends_with('\r') {
                line.pop();
            }
            if sender
                .send(ProcessEvent::Line {
                    process: key,
                    stream,
                    line,
                })
                .is_err()
            {
                break;
            }
        }
        let _ = sender.send(ProcessEvent::Exited { process: key });
    };
    // The loop is the only place that re-enters host state; this future
    // only ever decodes bytes and forwards them through the channel.
    let _ = scheduler.schedule(task);
}

/// Tracks which plugin instance owns which process and which `on_output`
/// callback id to invoke, so C1 can route a [`ProcessEvent::Line`] without
/// the supervisor itself knowing about the scripting layer.
#[derive(Default)]
pub struct OutputRouter {
    owners: HashMap<ProcessKey, crate::script::handles::PluginInstanceKey>,
}

impl OutputRouter {
    pub fn register(&mut self, process: ProcessKey, owner: crate::script::handles::PluginInstanceKey) {
        self.owners.insert(process, owner);
    }

    pub fn unregister(&mut self, process: ProcessKey) {
        self.owners.remove(&process);
    }

    pub fn owner(&self, process: ProcessKey) -> Option<crate::script::handles::PluginInstanceKey> {
        self.owners.get(&process).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_on_unknown_key_is_a_no_op() {
        let mut supervisor = ProcessSupervisor::new();
        let mut other = Slab::<()>::new();
        let bogus = other.insert(());
        // Key types line up structurally; this just exercises the not-found path.
        supervisor.kill(bogus);
    }

    /// §8 property 7: lines are delivered in order with terminators
    /// stripped, including a trailing CR from a CRLF-writing child.
    #[test]
    fn lines_are_split_and_stripped_in_order() {
        let input = b"try_create_image: created.* image: 1920x1080\r\nsecond line\n".to_vec();
        let reader = BufReader::new(futures_lite::io::Cursor::new(input));
        let mut lines = reader.lines();
        let collected: Vec<String> = futures_lite::future::block_on(async {
            let mut out = Vec::new();
            while let Some(line) = futures_lite::StreamExt::next(&mut lines).await {
                let mut line = line.unwrap();
                if line.ends_with('\r') {
                    line.pop();
                }
                out.push(line);
            }
            out
        });
        assert_eq!(
            collected,
            vec![
                "try_create_image: created.* image: 1920x1080".to_string(),
                "second line".to_string(),
            ]
        );
    }
}
