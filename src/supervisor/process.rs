//! Process table access: find the bot by command line and kill it.

use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// One live process as seen by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Full argv, program first.
    pub cmd: Vec<String>,
}

impl ProcessInfo {
    pub fn command_line(&self) -> String {
        if self.cmd.is_empty() {
            self.name.clone()
        } else {
            self.cmd.join(" ")
        }
    }
}

/// Source of process information and signals.
pub trait ProcessTable: Send {
    /// Live processes, excluding the caller itself and zombies.
    fn scan(&mut self) -> Vec<ProcessInfo>;
    /// Send SIGKILL. Returns false if the signal could not be delivered.
    fn kill(&mut self, pid: u32) -> bool;
}

/// The host's process table.
pub struct SysinfoTable {
    system: System,
    own_pid: Option<Pid>,
}

impl SysinfoTable {
    pub fn new() -> Self {
        Self { system: System::new(), own_pid: sysinfo::get_current_pid().ok() }
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoTable {
    fn scan(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        let mut found: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != self.own_pid)
            .filter(|(_, process)| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            // Threads show up as separate entries on Linux.
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cmd: process.cmd().iter().map(|arg| arg.to_string_lossy().into_owned()).collect(),
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .is_some_and(|process| process.kill())
    }
}

/// Identifies a program started with one of a set of subcommands, e.g.
/// `diamond-bot run` / `diamond-bot serve`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessPattern {
    pub program: String,
    pub roles: Vec<String>,
}

impl ProcessPattern {
    pub fn new(program: &str, roles: &[&str]) -> Self {
        Self { program: program.to_string(), roles: roles.iter().map(|r| r.to_string()).collect() }
    }

    fn is_program(&self, process: &ProcessInfo) -> bool {
        let argv0 = process
            .cmd
            .first()
            .and_then(|arg| Path::new(arg).file_name())
            .map(|name| name.to_string_lossy());
        process.name == self.program || argv0.is_some_and(|name| name == self.program.as_str())
    }

    /// Exact match: the executable is the program and one of the arguments
    /// is a role.
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        self.is_program(process) && process.cmd.iter().skip(1).any(|arg| self.roles.iter().any(|r| r == arg))
    }

    /// Loose match on the command line text, used when an exact kill did not
    /// take.
    pub fn matches_broadly(&self, process: &ProcessInfo) -> bool {
        let line = process.command_line();
        line.contains(&self.program) && self.roles.iter().any(|r| line.contains(r.as_str()))
    }

    /// PIDs of exact matches.
    pub fn find(&self, table: &mut dyn ProcessTable) -> Vec<u32> {
        table.scan().iter().filter(|p| self.matches(p)).map(|p| p.pid).collect()
    }

    pub fn find_broadly(&self, table: &mut dyn ProcessTable) -> Vec<u32> {
        table.scan().iter().filter(|p| self.matches_broadly(p)).map(|p| p.pid).collect()
    }
}
