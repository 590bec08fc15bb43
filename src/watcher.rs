//! The trace loop: driving a build process from syscall stop to syscall stop
//! and collecting the paths it opens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{self as wait, waitpid, Id, WaitPidFlag, WaitStatus};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, ResultExt, TraceOp};
use crate::filter::PathSet;
use crate::launch;
use crate::open_call;
use crate::tracee::{Pid, Tracee};

/// Outcome of one watch run.
///
/// Paths collected before a mid-trace failure are preserved: partial
/// dependency information is still useful, so `paths` is valid whether or not
/// `error` is set.
#[derive(Debug, Default)]
pub struct WatchReport {
    /// Distinct filter-accepted paths, in first-observed order.
    pub paths: Vec<String>,

    /// Error that ended the trace early, if any.
    pub error: Option<Error>,

    /// Exit code of the build command, if it terminated normally.
    pub exit_code: Option<i32>,
}

impl WatchReport {
    /// Convert into a `Result`, discarding partial paths on error.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.paths),
        }
    }
}

/// Signal for aborting a watch in progress.
///
/// Raising the token terminates the traced build; the watch then returns
/// whatever paths were collected up to that point, with no error.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    raised: AtomicBool,

    // PID of the running tracee, if a trace is attached. The slot is bound
    // only while the child is unreaped, so a kill through it can never hit
    // a recycled pid.
    tracee: Mutex<Option<Pid>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token, killing the tracee if one is attached.
    pub fn cancel(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);

        // Kill only under the slot lock: the watcher clears the slot before
        // it reaps, so a bound pid still names our child.
        if let Ok(slot) = self.inner.tracee.lock() {
            if let Some(pid) = *slot {
                // The loop observes the resulting termination status.
                let _ = signal::kill(pid, Signal::SIGKILL);
            }
        }
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    fn bind(&self, pid: Pid) {
        if let Ok(mut slot) = self.inner.tracee.lock() {
            *slot = Some(pid);
        }
    }

    fn unbind(&self) {
        if let Ok(mut slot) = self.inner.tracee.lock() {
            *slot = None;
        }
    }
}

// Expected next syscall-stop for the tracee.
//
// Syscall-enter and -exit stops are indistinguishable to the tracer, which
// must track their alternation itself. Only enter-stops carry usable
// arguments; exit-stops are resumed without inspection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    // Next syscall-stop is an enter-stop.
    Running,

    // In a syscall; next syscall-stop is the matching exit-stop.
    Syscalling,
}

/// Watches one build command for the source files it opens.
///
/// The ptrace stop/continue protocol binds to the controlling thread, so the
/// entire trace (spawn, every resume, every wait) runs synchronously on the
/// thread that calls [`watch()`](Watcher::watch). Callers multiplexing work
/// across threads should dedicate one thread to the watch for its lifetime.
#[derive(Clone, Debug)]
pub struct Watcher {
    argv: Vec<String>,
    cancel: CancelToken,
    path_ceiling: usize,
}

impl Watcher {
    pub fn new<S: AsRef<str>>(argv: &[S]) -> Self {
        let argv = argv.iter().map(|s| s.as_ref().to_owned()).collect();
        let cancel = CancelToken::new();
        let path_ceiling = open_call::PATH_CEILING;

        Self { argv, cancel, path_ceiling }
    }

    /// Return a token that aborts this watch when raised.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the build command under trace and collect every distinct opened
    /// path accepted by `filter`, in first-observed order.
    ///
    /// The filter must be pure: it may be invoked many times during one
    /// trace, including repeatedly for the same path.
    pub fn watch<F>(self, filter: F) -> WatchReport
    where
        F: Fn(&str) -> bool,
    {
        let mut report = WatchReport::default();

        let child = match launch::spawn_traced(&self.argv) {
            Ok(child) => child,
            Err(err) => {
                report.error = Some(err);
                return report;
            },
        };

        let pid = Pid::from_raw(child.id() as i32);
        let tracee = Tracee::new(pid);

        self.cancel.bind(pid);

        let mut paths = PathSet::new();

        match self.trace_loop(&tracee, &filter, &mut paths) {
            Ok(exit_code) => {
                report.exit_code = exit_code;
            },
            Err(err) => {
                // The tracee's state is no longer reliably known. Terminate
                // and reap it rather than leave it stopped or running.
                let _ = signal::kill(pid, Signal::SIGKILL);
                self.cancel.unbind();
                let _ = waitpid(pid, None);

                report.error = Some(err);
            },
        }

        report.paths = paths.into_vec();
        report
    }

    // Observe the tracee's next wait status.
    //
    // Termination statuses are peeked with `WNOWAIT` first, so the cancel
    // slot can be cleared while the child still exists: once the child is
    // reaped its pid may be recycled, and a raised token must never signal
    // a pid it no longer owns.
    fn wait_tracee(&self, pid: Pid) -> Result<WaitStatus> {
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::WNOWAIT;
        let status = wait::waitid(Id::Pid(pid), flags).trace_err(pid, TraceOp::Wait)?;

        if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
            self.cancel.unbind();
        }

        // Consume the peeked status; for a termination, this reaps.
        waitpid(pid, None).trace_err(pid, TraceOp::Wait)?;

        Ok(status)
    }

    // Drive the stop/continue protocol until the tracee exits, the trace
    // fails, or the cancel token is raised.
    //
    // Returns the tracee's exit code on normal termination, `None` if it was
    // signaled or the watch was cancelled.
    fn trace_loop<F>(
        &self,
        tracee: &Tracee,
        filter: &F,
        paths: &mut PathSet,
    ) -> Result<Option<i32>>
    where
        F: Fn(&str) -> bool,
    {
        let pid = tracee.pid();

        // First stop: the SIGTRAP delivered on return from the initial
        // `execve()` after the pre-exec `PTRACE_TRACEME` request.
        match self.wait_tracee(pid)? {
            WaitStatus::Exited(_, exit_code) => {
                // Died before its first instruction.
                return Ok(Some(exit_code));
            },
            WaitStatus::Signaled(..) => return Ok(None),
            status => {
                debug!(pid = pid.as_raw(), ?status, "tracee attach-stop");
            },
        }

        let options = Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_TRACEEXEC;
        ptrace::setoptions(pid, options).trace_err(pid, TraceOp::SetOptions)?;

        let mut state = State::Running;
        ptrace::syscall(pid, None).trace_err(pid, TraceOp::Restart)?;

        loop {
            if self.cancel.is_raised() {
                info!(pid = pid.as_raw(), "watch cancelled, terminating tracee");

                let _ = signal::kill(pid, Signal::SIGKILL);
                self.cancel.unbind();
                let _ = waitpid(pid, None);

                return Ok(None);
            }

            let status = self.wait_tracee(pid)?;

            let pending = match status {
                WaitStatus::Exited(_, exit_code) => {
                    debug!(pid = pid.as_raw(), exit_code, "tracee exited");
                    return Ok(Some(exit_code));
                },
                WaitStatus::Signaled(_, signal, _) => {
                    debug!(pid = pid.as_raw(), ?signal, "tracee terminated by signal");
                    return Ok(None);
                },
                WaitStatus::PtraceSyscall(_) => {
                    match state {
                        State::Running => {
                            // Syscall-enter-stop: the only stop whose
                            // registers carry usable arguments.
                            self.inspect_enter(tracee, filter, paths)?;
                            state = State::Syscalling;
                        },
                        State::Syscalling => {
                            state = State::Running;
                        },
                    }

                    None
                },
                WaitStatus::PtraceEvent(_, _, libc::PTRACE_EVENT_EXEC) => {
                    // The exec'd syscall reports its exit-stop next.
                    state = State::Syscalling;
                    None
                },
                WaitStatus::PtraceEvent(..) => None,
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    // Ptrace artifact, not tracee traffic. Suppress.
                    None
                },
                WaitStatus::Stopped(_, signal) => {
                    // Deliver the signal on restart.
                    Some(signal)
                },
                WaitStatus::Continued(_) | WaitStatus::StillAlive => None,
            };

            ptrace::syscall(pid, pending).trace_err(pid, TraceOp::Restart)?;
        }
    }

    // Inspect one syscall-enter stop, collecting the path if it is a
    // filter-accepted file-open.
    fn inspect_enter<F>(&self, tracee: &Tracee, filter: &F, paths: &mut PathSet) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let regs = tracee.registers()?;

        match open_call::decode(tracee, &regs, self.path_ceiling) {
            Ok(Some(path)) => {
                if filter(&path) && paths.insert(path.clone()) {
                    debug!(pid = tracee.pid().as_raw(), %path, "collected path");
                }
            },
            Ok(None) => {},
            Err(err @ Error::PathOverrun { .. }) => {
                // One unterminated path argument shouldn't end the watch.
                warn!(%err, "skipping undecodable open call");
            },
            Err(err) => return Err(err),
        }

        Ok(())
    }
}

/// Watch the build started by running `argv` and return every distinct
/// opened path accepted by `filter`, in first-observed order.
///
/// On failure, the report still carries the paths collected before the
/// error. `argv` must be non-empty.
pub fn watch_build<S, F>(argv: &[S], filter: F) -> WatchReport
where
    S: AsRef<str>,
    F: Fn(&str) -> bool,
{
    Watcher::new(argv).watch(filter)
}
