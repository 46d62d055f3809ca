//! Resident memory of the daemon process, for the admission budget.

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Resident set size of this process in megabytes, or `None` where the
/// platform does not report it.
pub fn resident_set_mb() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );
    sys.process(pid).map(|p| p.memory() / 1024 / 1024)
}

/// Whether current usage exceeds `limit_mb`. Unknown usage never blocks.
pub fn over_budget(limit_mb: Option<u64>) -> bool {
    let Some(limit) = limit_mb else {
        return false;
    };
    resident_set_mb().is_some_and(|used| used > limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_own_resident_set() {
        let used = resident_set_mb().expect("process memory is reported");
        assert!(used > 0);
        assert!(over_budget(Some(0)));
        assert!(!over_budget(Some(used * 1024)));
    }

    #[test]
    fn test_no_limit_never_blocks() {
        assert!(!over_budget(None));
    }
}
