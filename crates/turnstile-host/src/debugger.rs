/// Probe consulted by the watchdog before aborting a slow script
pub type DebuggerProbe = fn() -> bool;

/// Whether an interactive debugger (or any tracer) is attached to this process
#[cfg(target_os = "linux")]
pub fn is_attached() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .map(|pid| pid.trim() != "0")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
pub fn is_attached() -> bool {
    false
}

/// Probe that always reports no debugger
pub fn never_attached() -> bool {
    false
}
