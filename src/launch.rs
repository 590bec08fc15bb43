//! Spawning a build command as a stopped tracee.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use nix::sys::ptrace;
use tracing::debug;

use crate::error::{Error, Result};

/// Spawn `argv` with a pre-exec `PTRACE_TRACEME` request.
///
/// The child inherits the caller's working directory, environment, and
/// standard I/O streams. Because it self-attaches before `exec()`, it will be
/// stopped by a `SIGTRAP` on return from the initial `execve()`, before
/// running any of its own instructions. The caller must observe that stop via
/// `waitpid()` before issuing further ptrace requests.
pub fn spawn_traced(argv: &[String]) -> Result<Child> {
    let (exe, args) = argv.split_first().ok_or(Error::EmptyCommand)?;

    let mut cmd = Command::new(exe);
    cmd.args(args);

    // On fork, request `PTRACE_TRACEME`.
    unsafe {
        cmd.pre_exec(|| {
            ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32))
        });
    }

    let child = cmd.spawn().map_err(|source| Error::Launch {
        command: exe.clone(),
        source,
    })?;

    debug!(pid = child.id(), command = %exe, "spawned tracee");

    Ok(child)
}
