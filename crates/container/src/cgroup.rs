use std::path::PathBuf;

use fs_err as fs;
use nix::unistd::Pid;
use snafu::{ResultExt, Snafu};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// A disposable cgroups v2 leaf used to cap the memory a sandboxed build
/// may use and detect whether the kernel OOM-killed it.
pub struct Cgroup {
    path: PathBuf,
}

impl Cgroup {
    /// Create `<CGROUP_ROOT>/<name>` with `memory.max` set to `limit_bytes`
    /// and swap disabled, so an OOM condition is visible rather than papered
    /// over by swap.
    pub fn create(name: &str, limit_bytes: u64) -> Result<Self, Error> {
        let path = PathBuf::from(CGROUP_ROOT).join(name);
        fs::create_dir_all(&path).context(CreateSnafu)?;

        fs::write(path.join("memory.max"), limit_bytes.to_string()).context(WriteSnafu { file: "memory.max" })?;
        fs::write(path.join("memory.swap.max"), "0").context(WriteSnafu {
            file: "memory.swap.max",
        })?;

        Ok(Self { path })
    }

    /// Move `pid` into this cgroup. Must happen before the process begins
    /// allocating in earnest (right after clone returns).
    pub fn add_process(&self, pid: Pid) -> Result<(), Error> {
        fs::write(self.path.join("cgroup.procs"), pid.to_string()).context(WriteSnafu { file: "cgroup.procs" })
    }

    /// Whether the kernel has OOM-killed a process in this cgroup since creation.
    pub fn oom_killed(&self) -> bool {
        let Ok(events) = fs::read_to_string(self.path.join("memory.events")) else {
            return false;
        };

        events
            .lines()
            .filter_map(|line| line.strip_prefix("oom_kill "))
            .any(|count| count.trim().parse::<u64>().unwrap_or(0) > 0)
    }
}

impl Drop for Cgroup {
    fn drop(&mut self) {
        // Only succeeds once cgroup.procs is empty, which holds once the
        // sandboxed process has been waited on.
        let _ = fs::remove_dir(&self.path);
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("create cgroup directory"))]
    Create { source: std::io::Error },
    #[snafu(display("write cgroup {file}"))]
    Write { file: &'static str, source: std::io::Error },
}
