//! Multi-process serving.
//!
//! With `max_servers > 1` the parent process re-executes itself once per
//! slot (capped at the CPU count) and supervises the children. Every child
//! binds the same address with SO_REUSEPORT so the kernel spreads accepted
//! connections across the pool. A child that exits non-zero is respawned;
//! a clean exit retires its slot.

use std::ffi::OsString;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ListenerConfig;

/// Environment marker distinguishing pool children from the parent.
pub const CHILD_ENV: &str = "EDGESERVE_CHILD";

const RESPAWN_DELAY: Duration = Duration::from_millis(200);

pub fn is_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Pool size actually used: configured, capped at the CPU count, at least 1.
pub fn effective_servers(config: &ListenerConfig) -> usize {
    config.max_servers.clamp(1, num_cpus::get())
}

/// Binds the listen address with SO_REUSEADDR and (on unix) SO_REUSEPORT,
/// so pool members can share it.
pub fn bind_shared(address: &str) -> io::Result<std::net::TcpListener> {
    let addr: SocketAddr = address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("listen address {address:?} did not resolve"),
        )
    })?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Runs the supervision loop: `count` children, respawn on abnormal exit.
/// Returns once every slot has retired or on Ctrl+C.
pub async fn run_pool(count: usize) -> io::Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    info!(count, "starting server pool");

    let mut slots = JoinSet::new();
    for slot in 0..count {
        slots.spawn(child_loop(slot, exe.clone(), args.clone()));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping pool");
        }
        _ = async {
            while slots.join_next().await.is_some() {}
        } => {
            info!("All pool slots retired");
        }
    }
    Ok(())
}

async fn child_loop(slot: usize, exe: std::path::PathBuf, args: Vec<OsString>) {
    loop {
        let mut command = Command::new(&exe);
        command.args(&args).env(CHILD_ENV, "1");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(slot, error = %e, "failed to spawn pool child");
                return;
            }
        };
        info!(slot, pid = child.id(), "pool child started");

        match child.wait().await {
            Ok(status) if status.success() => {
                info!(slot, "pool child exited cleanly");
                return;
            }
            Ok(status) => {
                warn!(slot, code = status.code(), "pool child died, respawning");
                tokio::time::sleep(RESPAWN_DELAY).await;
            }
            Err(e) => {
                error!(slot, error = %e, "failed to wait on pool child");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_servers_caps_at_cpu_count() {
        let mut config = ListenerConfig::default();
        config.max_servers = 10_000;
        assert!(effective_servers(&config) <= num_cpus::get());

        config.max_servers = 0;
        assert_eq!(effective_servers(&config), 1);
    }

    #[test]
    fn test_bind_shared_twice() {
        let first = bind_shared("127.0.0.1:0").expect("first bind");
        let addr = first.local_addr().expect("local addr");
        // Reuseport allows a second member on the exact same address.
        #[cfg(unix)]
        bind_shared(&addr.to_string()).expect("second bind");
        #[cfg(not(unix))]
        let _ = addr;
    }
}
