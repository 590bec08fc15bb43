//! Syscall calling convention on x86_64.

/// Register state of a tracee, as returned by `PTRACE_GETREGS`.
pub type Registers = libc::user_regs_struct;

const OPEN: u64 = libc::SYS_open as u64;
const CREAT: u64 = libc::SYS_creat as u64;
const OPENAT: u64 = libc::SYS_openat as u64;
const OPENAT2: u64 = libc::SYS_openat2 as u64;

/// Syscall number at a syscall-stop.
pub fn syscall_number(regs: &Registers) -> u64 {
    regs.orig_rax
}

/// For a file-open syscall, the tracee-space address of its path argument.
///
/// Arguments are passed in `rdi`, `rsi`, `rdx`, `r10`, `r8`, `r9`. `open(2)`
/// and `creat(2)` take the path first; the `openat` family takes a directory
/// fd first and the path second.
pub fn open_path_addr(regs: &Registers) -> Option<u64> {
    match syscall_number(regs) {
        OPEN | CREAT => Some(regs.rdi),
        OPENAT | OPENAT2 => Some(regs.rsi),
        _ => None,
    }
}
