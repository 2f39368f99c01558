use std::ffi::CString;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::ptr::addr_of_mut;
use std::thread;

use fs_err::{self as fs, PathExt as _};
use nix::libc::SIGCHLD;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, clone};
use nix::sys::prctl::set_pdeathsig;
use nix::sys::signal::Signal;
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Uid, close, dup2, execvp, pipe, pivot_root, read, sethostname, write};
use snafu::{ResultExt, Snafu};

use self::cgroup::Cgroup;
use self::idmap::idmap;

mod cgroup;
mod idmap;

/// Exit codes the setup/exec machinery uses to signal its own failures,
/// distinct from anything the sandboxed program itself might return.
const SETUP_FAILURE_EXIT: i32 = 125;
const EXEC_FAILURE_EXIT: i32 = 126;
const OOM_EXIT: i32 = 137;

/// Builds and runs a Linux-namespace sandbox: a fresh mount/PID/IPC/UTS
/// namespace (plus a user namespace when unprivileged), a bind-mounted
/// filesystem view, network disabled, and an optional cgroups v2 memory
/// cap. The sandboxed program replaces the cloned child's process image
/// via `execvp`, so its exit code is observed directly.
pub struct Container {
    root: PathBuf,
    work_dir: Option<PathBuf>,
    binds: Vec<Bind>,
    hostname: Option<String>,
    memory_limit_bytes: Option<u64>,
}

/// Classified outcome of a sandboxed run.
#[derive(Debug, Clone)]
pub enum Exit {
    Success,
    /// The sandboxed program exited 1; stderr captured for diagnostics.
    ScriptFailed { stderr: String },
    /// The cgroup's memory cap killed the process.
    MemoryLimitExceeded,
    /// Any other non-zero exit not covered above.
    Other { code: i32, stderr: String },
}

impl Container {
    /// Create a new Container using the default options
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            work_dir: None,
            binds: vec![],
            hostname: None,
            memory_limit_bytes: None,
        }
    }

    /// Override the working directory
    pub fn work_dir(self, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            ..self
        }
    }

    /// Create a read-write bind mount
    pub fn bind_rw(mut self, host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        self.binds.push(Bind {
            source: host.into(),
            target: guest.into(),
            read_only: false,
        });
        self
    }

    /// Create a read-only bind mount
    pub fn bind_ro(mut self, host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        self.binds.push(Bind {
            source: host.into(),
            target: guest.into(),
            read_only: true,
        });
        self
    }

    /// Override hostname (via sethostname, visible through /proc)
    pub fn hostname(self, hostname: impl ToString) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..self
        }
    }

    /// Cap the sandbox's resident memory via a dedicated cgroups v2 leaf.
    /// Exceeding it is reported back as [`Exit::MemoryLimitExceeded`].
    pub fn memory_limit(self, bytes: u64) -> Self {
        Self {
            memory_limit_bytes: Some(bytes),
            ..self
        }
    }

    /// Run `program` (with `args`, `args[0]` conventionally the program
    /// itself) as the container's entrypoint. Namespaces and mounts are
    /// prepared in the cloned child, which then execs directly into
    /// `program` so its real exit status is visible to `waitpid`.
    pub fn run(self, program: &Path, args: &[String]) -> Result<Exit, Error> {
        static mut STACK: [u8; 4 * 1024 * 1024] = [0u8; 4 * 1024 * 1024];

        let rootless = !Uid::effective().is_root();

        let c_program = CString::new(program.as_os_str().as_bytes()).context(NulSnafu)?;
        let c_args = args
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .context(NulSnafu)?;

        // Pipe to synchronize parent & child, and to relay setup-failure text back.
        let sync = pipe().context(NixSnafu)?;
        // Pipe the sandboxed program's stderr back to the parent.
        let stderr_pipe = pipe().context(NixSnafu)?;

        let mut flags = CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWIPC
            | CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWNET;

        if rootless {
            flags |= CloneFlags::CLONE_NEWUSER;
        }

        let clone_cb = Box::new(|| match enter(&self, sync, stderr_pipe, &c_program, &c_args) {
            Ok(never) => match never {},
            Err(error) => {
                let message = format_error(error);
                let mut pos = 0;

                while pos < message.len() {
                    let Ok(len) = write(sync.1, &message.as_bytes()[pos..]) else {
                        break;
                    };
                    pos += len;
                }

                let _ = close(sync.1);

                SETUP_FAILURE_EXIT as isize
            }
        });

        let pid = unsafe { clone(clone_cb, &mut *addr_of_mut!(STACK), flags, Some(SIGCHLD)) }.context(NixSnafu)?;

        if rootless {
            idmap(pid).context(IdmapSnafu)?;
        }

        let cgroup = self
            .memory_limit_bytes
            .map(|limit| -> Result<Cgroup, Error> {
                let cgroup = Cgroup::create(&format!("kiln-{pid}"), limit).context(CgroupSnafu)?;
                cgroup.add_process(pid).context(CgroupSnafu)?;
                Ok(cgroup)
            })
            .transpose()?;

        // Allow child to continue past the barrier
        write(sync.1, &[Message::Continue as u8]).context(NixSnafu)?;
        close(sync.1).context(NixSnafu)?;
        // Parent doesn't write to the stderr pipe
        close(stderr_pipe.1).context(NixSnafu)?;

        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut file = unsafe { std::fs::File::from_raw_fd(stderr_pipe.0) };
            let _ = file.read_to_string(&mut buf);
            buf
        });

        let status = waitpid(pid, None).context(NixSnafu)?;
        let stderr = stderr_reader.join().unwrap_or_default();

        let code = match status {
            WaitStatus::Exited(_, code) => Some(code),
            // Mirror shell/Docker exit-status convention: a signal death is 128+signal.
            WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
            WaitStatus::Stopped(_, _)
            | WaitStatus::PtraceEvent(_, _, _)
            | WaitStatus::PtraceSyscall(_)
            | WaitStatus::Continued(_)
            | WaitStatus::StillAlive => None,
        };

        match code {
            Some(SETUP_FAILURE_EXIT) => {
                let mut message = String::new();
                let mut buffer = [0u8; 1024];
                loop {
                    let len = read(sync.0, &mut buffer).context(NixSnafu)?;
                    if len == 0 {
                        break;
                    }
                    message.push_str(String::from_utf8_lossy(&buffer[..len]).as_ref());
                }
                Err(Error::Setup { message })
            }
            Some(EXEC_FAILURE_EXIT) | Some(127) => Err(Error::Exec { stderr }),
            Some(0) => Ok(Exit::Success),
            Some(1) => Ok(Exit::ScriptFailed { stderr }),
            Some(OOM_EXIT) => Ok(Exit::MemoryLimitExceeded),
            Some(code) if cgroup.as_ref().is_some_and(Cgroup::oom_killed) => {
                let _ = code;
                Ok(Exit::MemoryLimitExceeded)
            }
            Some(code) => Ok(Exit::Other { code, stderr }),
            None => Err(Error::UnknownExit),
        }
    }
}

/// Re-enter the container: wait for the continue barrier, set up
/// namespaces/mounts, then exec straight into the sandboxed program.
/// Never returns on success since `execvp` replaces this process image.
fn enter(
    container: &Container,
    sync: (i32, i32),
    stderr_pipe: (i32, i32),
    program: &CString,
    args: &[CString],
) -> Result<std::convert::Infallible, ContainerError> {
    set_pdeathsig(Signal::SIGKILL).context(SetPDeathSigSnafu)?;

    let mut message = [0u8; 1];
    read(sync.0, &mut message).context(ReadContinueMsgSnafu)?;
    assert_eq!(message[0], Message::Continue as u8);
    close(sync.0).context(CloseReadFdSnafu)?;

    setup(container)?;

    close(stderr_pipe.0).context(CloseReadFdSnafu)?;
    dup2(stderr_pipe.1, nix::libc::STDERR_FILENO).context(Dup2Snafu)?;
    close(stderr_pipe.1).context(CloseReadFdSnafu)?;

    let err = execvp(program, args).expect_err("execvp only returns on failure");
    Err(ContainerError::Exec { source: err })
}

/// Setup the container
fn setup(container: &Container) -> Result<(), ContainerError> {
    pivot(&container.root, &container.binds)?;

    if let Some(hostname) = &container.hostname {
        sethostname(hostname).context(SetHostnameSnafu)?;
    }

    if let Some(dir) = &container.work_dir {
        set_current_dir(dir)?;
    }

    Ok(())
}

/// Pivot the process into the rootfs
fn pivot(root: &Path, binds: &[Bind]) -> Result<(), ContainerError> {
    const OLD_PATH: &str = "old_root";

    let old_root = root.join(OLD_PATH);

    add_mount(None, "/", None, MsFlags::MS_REC | MsFlags::MS_PRIVATE)?;
    add_mount(Some(root), root, None, MsFlags::MS_BIND)?;

    for bind in binds {
        let source = bind.source.fs_err_canonicalize().context(FsErrSnafu)?;
        let target = root.join(bind.target.strip_prefix("/").unwrap_or(&bind.target));

        ensure_mount_point(&target, source.is_file())?;
        add_mount_at(Some(&source), &target, None, MsFlags::MS_BIND)?;

        if bind.read_only {
            add_mount_at(
                Some(source),
                target,
                None,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            )?;
        }
    }

    ensure_directory(&old_root)?;
    pivot_root(root, &old_root).context(PivotRootSnafu)?;

    set_current_dir("/")?;

    add_mount(Some("proc"), "proc", Some("proc"), MsFlags::empty())?;
    add_mount(Some("tmpfs"), "tmp", Some("tmpfs"), MsFlags::empty())?;
    add_mount(
        Some(format!("/{OLD_PATH}/sys").as_str()),
        "sys",
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_SLAVE,
    )?;
    add_mount(
        Some(format!("/{OLD_PATH}/dev").as_str()),
        "dev",
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_SLAVE,
    )?;

    umount2(OLD_PATH, MntFlags::MNT_DETACH).context(UnmountOldRootSnafu)?;
    fs::remove_dir(OLD_PATH).context(FsErrSnafu)?;

    umask(Mode::S_IWGRP | Mode::S_IWOTH);

    Ok(())
}

fn ensure_directory(path: impl AsRef<Path>) -> Result<(), ContainerError> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).context(FsErrSnafu)?;
    }
    Ok(())
}

/// Ensure a bind target exists as the same kind of node as its source, so a
/// file-to-file bind (a single cached fetch) doesn't get mkdir'd into a
/// directory by mistake.
fn ensure_mount_point(target: &Path, source_is_file: bool) -> Result<(), ContainerError> {
    if source_is_file {
        if !target.exists() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).context(FsErrSnafu)?;
            }
            fs::File::create(target).context(FsErrSnafu)?;
        }
        Ok(())
    } else {
        ensure_directory(target)
    }
}

fn add_mount<T: AsRef<Path>>(
    source: Option<T>,
    target: T,
    fs_type: Option<&str>,
    flags: MsFlags,
) -> Result<(), ContainerError> {
    ensure_directory(target.as_ref())?;
    add_mount_at(source, target, fs_type, flags)
}

fn add_mount_at<T: AsRef<Path>>(
    source: Option<T>,
    target: T,
    fs_type: Option<&str>,
    flags: MsFlags,
) -> Result<(), ContainerError> {
    let target = target.as_ref();
    mount(
        source.as_ref().map(AsRef::as_ref),
        target,
        fs_type,
        flags,
        Option::<&str>::None,
    )
    .with_context(|_| MountSnafu {
        target: target.to_owned(),
    })?;
    Ok(())
}

fn set_current_dir(path: impl AsRef<Path>) -> Result<(), ContainerError> {
    let path = path.as_ref();
    std::env::set_current_dir(path).with_context(|_| SetCurrentDirSnafu { path: path.to_owned() })
}

fn format_error(error: impl std::error::Error) -> String {
    let sources = sources(&error);
    sources.join(": ")
}

fn sources(error: &dyn std::error::Error) -> Vec<String> {
    let mut sources = vec![error.to_string()];
    let mut source = error.source();
    while let Some(error) = source.take() {
        sources.push(error.to_string());
        source = error.source();
    }
    sources
}

struct Bind {
    source: PathBuf,
    target: PathBuf,
    read_only: bool,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("container setup failed: {message}"))]
    Setup { message: String },
    #[snafu(display("failed to exec sandboxed program: {stderr}"))]
    Exec { stderr: String },
    #[snafu(display("unknown exit reason"))]
    UnknownExit,
    #[snafu(display("error setting up rootless id map"))]
    Idmap { source: idmap::Error },
    #[snafu(display("error setting up memory cgroup"))]
    Cgroup { source: cgroup::Error },
    #[snafu(display("program or argument contains a nul byte"))]
    Nul { source: std::ffi::NulError },
    // FIXME: Replace with more fine-grained variants
    #[snafu(display("nix"))]
    Nix { source: nix::Error },
}

#[derive(Debug, Snafu)]
enum ContainerError {
    #[snafu(display("exec"), context(name(ContainerExecSnafu)))]
    Exec { source: nix::Error },
    #[snafu(display("set current dir"))]
    SetCurrentDirError { path: PathBuf, source: std::io::Error },
    #[snafu(display("set_pdeathsig"))]
    SetPDeathSig { source: nix::Error },
    #[snafu(display("wait for continue message"))]
    ReadContinueMsg { source: nix::Error },
    #[snafu(display("close read end of pipe"))]
    CloseReadFd { source: nix::Error },
    #[snafu(display("dup2 stderr"))]
    Dup2 { source: nix::Error },
    #[snafu(display("sethostname"))]
    SetHostname { source: nix::Error },
    #[snafu(display("pivot_root"))]
    PivotRoot { source: nix::Error },
    #[snafu(display("unmount old root"))]
    UnmountOldRoot { source: nix::Error },
    #[snafu(display("mount {}", target.display()))]
    Mount { target: PathBuf, source: nix::Error },
    #[snafu(display("filesystem"))]
    FsErr { source: std::io::Error },
}

#[repr(u8)]
enum Message {
    Continue = 1,
}
