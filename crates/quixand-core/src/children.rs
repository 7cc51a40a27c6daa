//! Detached child-process spawning, grounded in
//! `engine/process_execution/src/children.rs::ManagedChild`'s own-session
//! spawn: new session (`setsid`) so the child survives the parent's exit
//! and can be signaled as a group.

use std::io;
use std::process::Command;

/// Spawns `cmd` detached into its own session, the way
/// `adapters/local_docker.py::create` launches the watchdog with
/// `start_new_session=True` so it outlives the SDK process.
pub fn spawn_detached(mut cmd: Command) -> io::Result<u32> {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());
    let child = cmd.spawn()?;
    Ok(child.id())
}
