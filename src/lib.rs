//! Discover the source files a build reads by tracing its file-open syscalls.
//!
//! `buildwatch` runs a build command under ptrace, stops it at every syscall
//! boundary, decodes the path argument of each file-open call out of the
//! tracee's memory, and returns the distinct filter-accepted paths in
//! first-observed order. The build tool needs no cooperation and emits no
//! dependency information itself.
//!
//! ```no_run
//! let report = buildwatch::watch_build(&["make", "-j4"], buildwatch::c_and_cpp);
//!
//! for path in &report.paths {
//!     println!("{}", path);
//! }
//! ```
//!
//! Linux only: the stop/continue protocol is ptrace-specific. The trace runs
//! synchronously on the calling thread, which the ptrace attachment is bound
//! to for the trace's whole lifetime.

pub mod error;
pub mod filter;
pub mod launch;
pub mod open_call;
pub mod tracee;
pub mod watcher;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

pub use error::{Error, Result};
pub use filter::{c_and_cpp, PathSet};
pub use tracee::{Pid, Registers, Tracee};
pub use watcher::{watch_build, CancelToken, Watcher, WatchReport};
