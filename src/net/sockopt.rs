//! Listen socket tuning.
//!
//! Options are applied to the raw socket after creation and before bind.
//! Each option is platform-conditional: when the OS lacks support the option
//! is reported as [`OptionOutcome::Unsupported`] and the listener is created
//! anyway.

use std::io;

use socket2::Socket;

use crate::config::ListenConfig;

/// Socket options managed by [`apply_listen_socket_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    ReuseAddress,
    ReusePort,
    FastOpen,
    DeferAccept,
}

/// What happened to a single option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOutcome {
    Applied,
    Disabled,
    Unsupported,
}

/// Per-option result of applying a [`ListenConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedOptions {
    outcomes: Vec<(SocketOption, OptionOutcome)>,
}

impl AppliedOptions {
    /// Outcome recorded for `option`, if it was considered.
    pub fn outcome(&self, option: SocketOption) -> Option<OptionOutcome> {
        self.outcomes
            .iter()
            .find(|(o, _)| *o == option)
            .map(|(_, outcome)| *outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocketOption, OptionOutcome)> + '_ {
        self.outcomes.iter().copied()
    }

    fn record(&mut self, option: SocketOption, outcome: OptionOutcome) {
        if outcome == OptionOutcome::Unsupported {
            tracing::debug!(?option, "Socket option not supported on this platform, skipping");
        }
        self.outcomes.push((option, outcome));
    }
}

/// Apply `config` to a freshly created, unbound listen socket.
///
/// Errors other than missing OS support are returned and abort listener
/// creation.
pub fn apply_listen_socket_options(
    socket: &Socket,
    config: &ListenConfig,
) -> io::Result<AppliedOptions> {
    let mut applied = AppliedOptions::default();

    applied.record(SocketOption::ReuseAddress, reuse_address(socket)?);

    let outcome = if config.reuse_port {
        reuse_port(socket)?
    } else {
        OptionOutcome::Disabled
    };
    applied.record(SocketOption::ReusePort, outcome);

    let outcome = if config.fast_open {
        fast_open(socket, config.fast_open_queue_len)?
    } else {
        OptionOutcome::Disabled
    };
    applied.record(SocketOption::FastOpen, outcome);

    let outcome = if config.defer_accept {
        defer_accept(socket)?
    } else {
        OptionOutcome::Disabled
    };
    applied.record(SocketOption::DeferAccept, outcome);

    Ok(applied)
}

// SO_REUSEADDR lets a restarted server bind while old connections sit in
// TIME_WAIT. On Windows it allows port hijacking, so it is unix-only.
#[cfg(unix)]
fn reuse_address(socket: &Socket) -> io::Result<OptionOutcome> {
    degrade(socket.set_reuse_address(true))
}

#[cfg(not(unix))]
fn reuse_address(_socket: &Socket) -> io::Result<OptionOutcome> {
    Ok(OptionOutcome::Unsupported)
}

#[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
fn reuse_port(socket: &Socket) -> io::Result<OptionOutcome> {
    degrade(socket.set_reuse_port(true))
}

#[cfg(not(all(unix, not(target_os = "solaris"), not(target_os = "illumos"))))]
fn reuse_port(_socket: &Socket) -> io::Result<OptionOutcome> {
    Ok(OptionOutcome::Unsupported)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn fast_open(socket: &Socket, queue_len: u32) -> io::Result<OptionOutcome> {
    let queue_len = libc::c_int::try_from(queue_len).unwrap_or(libc::c_int::MAX);
    degrade(setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN, queue_len))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn fast_open(_socket: &Socket, _queue_len: u32) -> io::Result<OptionOutcome> {
    Ok(OptionOutcome::Unsupported)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn defer_accept(socket: &Socket) -> io::Result<OptionOutcome> {
    // Seconds the kernel waits for the first payload before completing accept.
    degrade(setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, 1))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn defer_accept(_socket: &Socket) -> io::Result<OptionOutcome> {
    Ok(OptionOutcome::Unsupported)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn setsockopt_int(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the fd is owned by `socket` and stays open for the call; the
    // option value points to a live c_int whose size is passed alongside.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn degrade(result: io::Result<()>) -> io::Result<OptionOutcome> {
    match result {
        Ok(()) => Ok(OptionOutcome::Applied),
        Err(e) if is_unsupported(&e) => Ok(OptionOutcome::Unsupported),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
        || matches!(
            err.raw_os_error(),
            Some(libc::ENOPROTOOPT) | Some(libc::EOPNOTSUPP)
        )
}

#[cfg(not(unix))]
fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported
}
