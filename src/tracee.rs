//! Reading register and memory state out of a stopped tracee.

use std::marker::PhantomData;
use std::mem;

use nix::sys::ptrace;

use crate::error::{Result, ResultExt, TraceOp};

#[cfg(target_arch = "aarch64")]
use crate::aarch64 as arch;

#[cfg(target_arch = "x86_64")]
use crate::x86_64 as arch;

pub use nix::unistd::Pid;

/// Register state of a tracee.
pub type Registers = arch::Registers;

/// Linux constant defined in `include/uapi/linux/elf.h`.
#[cfg(target_arch = "aarch64")]
const NT_PRSTATUS: i32 = 0x1;

/// A process being traced, stopped at a ptrace-stop.
///
/// Register and memory reads are only valid while the tracee is stopped; the
/// underlying process is not guaranteed to exist, and operations on it may
/// fail between stops.
///
/// The ptrace attachment belongs to the OS thread that spawned the tracee,
/// so a `Tracee` is not `Send`: the trace stays pinned to one thread for its
/// whole lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tracee {
    pid: Pid,

    _not_send: PhantomData<*const ()>,
}

impl Tracee {
    pub(crate) fn new(pid: Pid) -> Self {
        let _not_send = PhantomData;

        Self { pid, _not_send }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Snapshot the tracee's general-purpose registers.
    #[cfg(target_arch = "x86_64")]
    pub fn registers(&self) -> Result<Registers> {
        ptrace::getregs(self.pid).trace_err(self.pid, TraceOp::ReadRegisters)
    }

    /// Snapshot the tracee's general-purpose registers.
    #[cfg(target_arch = "aarch64")]
    pub fn registers(&self) -> Result<Registers> {
        use nix::errno::Errno;

        let mut data = mem::MaybeUninit::<Registers>::uninit();
        let mut rv = libc::iovec {
            iov_base: data.as_mut_ptr() as *mut libc::c_void,
            iov_len: mem::size_of::<Registers>(),
        };

        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                self.pid.as_raw(),
                NT_PRSTATUS,
                &mut rv as *mut _ as *mut libc::c_void,
            )
        };

        Errno::result(res).trace_err(self.pid, TraceOp::ReadRegisters)?;

        Ok(unsafe { data.assume_init() })
    }

    /// Read up to `len` bytes at `addr` in the tracee's address space.
    ///
    /// `PTRACE_PEEKDATA` is word-granular, so this reads one word at a time,
    /// aligned down so no peek spans into a page the requested range does
    /// not touch. A fault partway through returns the bytes read so far; a
    /// fault on the first word is an error.
    pub fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        const WORD: usize = mem::size_of::<libc::c_long>();

        let mut data = Vec::with_capacity(len);

        while data.len() < len {
            let pos = addr + data.len() as u64;
            let aligned = pos & !(WORD as u64 - 1);
            let skip = (pos - aligned) as usize;

            match ptrace::read(self.pid, aligned as ptrace::AddressType) {
                Ok(word) => {
                    let bytes = word.to_ne_bytes();
                    let take = (WORD - skip).min(len - data.len());
                    data.extend_from_slice(&bytes[skip..skip + take]);
                },
                Err(errno) => {
                    if data.is_empty() {
                        return Err(errno).trace_err(self.pid, TraceOp::ReadMemory);
                    }

                    // Partial read, e.g. the tail of the range is unmapped.
                    break;
                },
            }
        }

        Ok(data)
    }

    /// Read a NUL-terminated byte string at `addr`, excluding the terminator.
    ///
    /// Reads at most `limit` bytes. If no terminator is found within the
    /// budget, fails with [`Error::PathOverrun`](crate::Error::PathOverrun)
    /// instead of reading on into a corrupt or adversarial address space.
    pub fn read_c_string(&self, addr: u64, limit: usize) -> Result<Vec<u8>> {
        const CHUNK: usize = 64;

        let mut data = Vec::new();

        while data.len() < limit {
            let chunk_len = CHUNK.min(limit - data.len());
            let chunk = self.read_memory(addr + data.len() as u64, chunk_len)?;

            if let Some(nul) = chunk.iter().position(|byte| *byte == 0) {
                data.extend_from_slice(&chunk[..nul]);
                return Ok(data);
            }

            // No terminator yet; a short chunk means the next read starts at
            // the faulting address and reports the error.
            data.extend_from_slice(&chunk);
        }

        Err(crate::Error::PathOverrun {
            pid: self.pid,
            addr,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nix::sys::signal::{self, Signal};
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    // Map two pages, unmap the second, and copy `bytes` so they end exactly
    // at the boundary with the unmapped page.
    fn plant_at_page_end(bytes: &[u8]) -> u64 {
        unsafe {
            let page = libc::sysconf(libc::_SC_PAGESIZE) as usize;

            let base = libc::mmap(
                std::ptr::null_mut(),
                2 * page,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(base, libc::MAP_FAILED);

            let second = (base as *mut u8).add(page) as *mut libc::c_void;
            assert_eq!(libc::munmap(second, page), 0);

            let dst = (base as *mut u8).add(page - bytes.len());
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());

            dst as u64
        }
    }

    // Fork a child that requests tracing and stops itself. The planted
    // mapping is inherited across the fork at the same address.
    fn fork_stopped_child() -> Pid {
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                // Only async-signal-safe calls before `_exit`.
                let _ = ptrace::traceme();
                let _ = signal::raise(Signal::SIGSTOP);
                unsafe { libc::_exit(0) }
            },
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert_eq!(status, WaitStatus::Stopped(child, Signal::SIGSTOP));
                child
            },
        }
    }

    fn reap(pid: Pid) {
        let _ = signal::kill(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
    }

    #[test]
    fn test_reads_terminator_in_last_mapped_bytes() {
        // An unaligned string whose NUL is the last mapped byte: every word
        // peeked must stay inside the mapped page.
        let path = b"src/main.c\0";
        let addr = plant_at_page_end(path);

        let pid = fork_stopped_child();
        let tracee = Tracee::new(pid);

        let read = tracee.read_c_string(addr, 4096).unwrap();
        assert_eq!(read, b"src/main.c");

        reap(pid);
    }

    #[test]
    fn test_partial_read_stops_at_unmapped_page() {
        let path = b"src/main.c\0";
        let addr = plant_at_page_end(path);

        let pid = fork_stopped_child();
        let tracee = Tracee::new(pid);

        // The range runs past the mapping; the read returns the mapped tail.
        let read = tracee.read_memory(addr, 64).unwrap();
        assert_eq!(read, path);

        reap(pid);
    }
}
