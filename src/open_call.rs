//! Recognizing file-open syscalls and decoding their path argument.

use tracing::trace;

use crate::error::Result;
use crate::tracee::{Registers, Tracee};

#[cfg(target_arch = "aarch64")]
use crate::aarch64 as arch;

#[cfg(target_arch = "x86_64")]
use crate::x86_64 as arch;

/// Upper bound on a decoded path, matching the kernel's `PATH_MAX`.
///
/// A path argument with no NUL terminator within this budget is rejected
/// rather than read unboundedly.
pub const PATH_CEILING: usize = 4096;

/// Decode the path of a file-open syscall from registers captured at a
/// syscall-enter stop.
///
/// Returns `None` if the stopped syscall does not open a file by path. The
/// open flags and mode arguments are not interpreted. Paths that are not
/// valid UTF-8 are decoded lossily.
pub fn decode(tracee: &Tracee, regs: &Registers, ceiling: usize) -> Result<Option<String>> {
    let addr = match arch::open_path_addr(regs) {
        Some(addr) => addr,
        None => return Ok(None),
    };

    let bytes = tracee.read_c_string(addr, ceiling)?;
    let path = String::from_utf8_lossy(&bytes).into_owned();

    trace!(
        pid = tracee.pid().as_raw(),
        scno = arch::syscall_number(regs),
        %path,
        "decoded open call",
    );

    Ok(Some(path))
}
