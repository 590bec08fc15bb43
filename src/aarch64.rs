//! Syscall calling convention on aarch64.

/// Register state of a tracee, read via `PTRACE_GETREGSET` with `NT_PRSTATUS`.
pub type Registers = user_pt_regs;

/// Defined in [`arch/arm64/include/uapi/asm/ptrace.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/arch/arm64/include/uapi/asm/ptrace.h#88).
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct user_pt_regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

const OPENAT: u64 = libc::SYS_openat as u64;
const OPENAT2: u64 = libc::SYS_openat2 as u64;

/// Syscall number at a syscall-stop.
///
/// Per the aarch64 syscall convention, the number is passed in `x8`.
pub fn syscall_number(regs: &Registers) -> u64 {
    regs.regs[8]
}

/// For a file-open syscall, the tracee-space address of its path argument.
///
/// aarch64 has no legacy `open(2)` or `creat(2)`; the `openat` family takes
/// a directory fd in `x0` and the path in `x1`.
pub fn open_path_addr(regs: &Registers) -> Option<u64> {
    match syscall_number(regs) {
        OPENAT | OPENAT2 => Some(regs.regs[1]),
        _ => None,
    }
}
