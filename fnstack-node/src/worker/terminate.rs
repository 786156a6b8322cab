//! Process tree termination
//!
//! Workers are started as process group leaders, so one group signal reaches
//! everything they spawned. Where group signalling is unavailable or fails,
//! the tree is walked from the process table and killed leaf first.

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

/// Forcefully terminate `pid` and its descendants. Best-effort.
pub fn terminate_process_tree(pid: u32) {
    #[cfg(unix)]
    {
        if signal_group(pid) {
            return;
        }
    }
    kill_tree(pid);
}

/// Send SIGKILL to the process group led by `pid`.
/// Returns `false` when the fallback should run.
#[cfg(unix)]
fn signal_group(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid as UnixPid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(UnixPid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pgid = pid, "Sent SIGKILL to process group");
            true
        }
        // Group already gone
        Err(Errno::ESRCH) => true,
        Err(e) => {
            debug!(pgid = pid, error = %e, "Process group signal failed");
            false
        }
    }
}

/// Kill `pid` and every known descendant individually
fn kill_tree(pid: u32) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let root = Pid::from_u32(pid);
    let mut order = vec![root];
    let mut index = 0;
    while index < order.len() {
        let parent = order[index];
        for (child, process) in system.processes() {
            if process.parent() == Some(parent) && !order.contains(child) {
                order.push(*child);
            }
        }
        index += 1;
    }

    for target in order.iter().rev() {
        if let Some(process) = system.process(*target) {
            let killed = process.kill();
            debug!(pid = target.as_u32(), killed, "Killed process");
        }
    }
}
