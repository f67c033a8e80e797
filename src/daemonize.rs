//! Detaching from the controlling terminal: fork, start a new session,
//! redirect the standard fds to `/dev/null`. Implemented directly over
//! `nix`'s process primitives rather than a dedicated daemonize crate.

use std::os::fd::AsRawFd;

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult};

use crate::error::StartupError;

/// Forks, exits the parent, starts a new session in the child, and
/// redirects stdin/stdout/stderr to `/dev/null`. Must be called before
/// any other threads are spawned — forking a multi-threaded process
/// only duplicates the calling thread, leaving the child's runtime in
/// an inconsistent state.
pub fn daemonize() -> Result<(), StartupError> {
    // SAFETY: called from `main` before any other threads exist.
    match unsafe { unistd::fork() }.map_err(StartupError::Daemonize)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::setsid().map_err(StartupError::Daemonize)?;
    unistd::chdir("/").map_err(StartupError::Daemonize)?;

    let dev_null = fcntl::open("/dev/null", OFlag::O_RDWR, Mode::empty())
        .map_err(StartupError::Daemonize)?;
    for target in [
        std::io::stdin().as_raw_fd(),
        std::io::stdout().as_raw_fd(),
        std::io::stderr().as_raw_fd(),
    ] {
        unistd::dup2(dev_null, target).map_err(StartupError::Daemonize)?;
    }
    unistd::close(dev_null).map_err(StartupError::Daemonize)?;

    Ok(())
}

/// Installs the process-wide signal dispositions: `SIGPIPE` ignored
/// always, `SIGHUP` additionally ignored when daemonized.
pub fn ignore_signals(daemonized: bool) -> Result<(), StartupError> {
    use nix::sys::signal::{self, SigHandler, Signal};
    // SAFETY: installing a `SIG_IGN` disposition has no preconditions
    // beyond being called before signal delivery matters, i.e. early
    // in `main`.
    unsafe {
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn).map_err(StartupError::Signal)?;
        if daemonized {
            signal::signal(Signal::SIGHUP, SigHandler::SigIgn).map_err(StartupError::Signal)?;
        }
    }
    Ok(())
}
