use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Resident memory of the current process in bytes, or zero when unavailable
pub fn process_memory() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };

    let mut sys = System::new_with_specifics(RefreshKind::nothing());
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );

    sys.process(pid).map(|process| process.memory()).unwrap_or(0)
}

/// Growth between two readings, floored at zero
pub fn memory_delta(start: u64, end: u64) -> u64 {
    end.saturating_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_delta_floors_at_zero() {
        assert_eq!(memory_delta(100, 250), 150);
        assert_eq!(memory_delta(250, 100), 0);
    }

    #[test]
    fn test_process_memory_does_not_panic() {
        // Zero on platforms sysinfo does not support
        let _ = process_memory();
    }
}
