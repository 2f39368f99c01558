use fs_err as fs;
use nix::unistd::{Gid, Pid, Uid};
use snafu::{ResultExt, Snafu};

/// Map the invoking user to root inside a freshly cloned user namespace.
///
/// Must run before the child proceeds past the continue barrier: the
/// child's namespace-owning process (this one) is the only one allowed
/// to write these files once the namespace exists.
pub fn idmap(pid: Pid) -> Result<(), Error> {
    let uid = Uid::current();
    let gid = Gid::current();

    // setgroups must be denied before gid_map can be written unprivileged
    fs::write(format!("/proc/{pid}/setgroups"), "deny").context(WriteSnafu { file: "setgroups" })?;
    fs::write(format!("/proc/{pid}/uid_map"), format!("0 {uid} 1\n")).context(WriteSnafu { file: "uid_map" })?;
    fs::write(format!("/proc/{pid}/gid_map"), format!("0 {gid} 1\n")).context(WriteSnafu { file: "gid_map" })?;

    Ok(())
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("write /proc/<pid>/{file}"))]
    Write { file: &'static str, source: std::io::Error },
}
