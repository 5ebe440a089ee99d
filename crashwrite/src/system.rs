//! The parts of the `system` section the recorder fills in itself.

use crashwrite_common::fields;
use crashwrite_json::ReportWriter;

use crate::config::AppState;

/// Physical memory, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub usable: u64,
    pub free: u64,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn memory_stats() -> MemoryStats {
    fn sysconf(name: libc::c_int) -> u64 {
        // SAFETY: sysconf has no preconditions.
        let value = unsafe { libc::sysconf(name) };
        if value < 0 {
            0
        } else {
            value as u64
        }
    }
    let page_size = sysconf(libc::_SC_PAGESIZE);
    MemoryStats {
        usable: sysconf(libc::_SC_PHYS_PAGES).saturating_mul(page_size),
        free: sysconf(libc::_SC_AVPHYS_PAGES).saturating_mul(page_size),
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn memory_stats() -> MemoryStats {
    let mut stats: libc::vm_statistics64 = unsafe { std::mem::zeroed() };
    let mut count = libc::HOST_VM_INFO64_COUNT;
    // SAFETY: `stats` is large enough for HOST_VM_INFO64_COUNT words.
    #[allow(deprecated)]
    let kr = unsafe {
        libc::host_statistics64(
            libc::mach_host_self(),
            libc::HOST_VM_INFO64,
            &mut stats as *mut libc::vm_statistics64 as libc::host_info64_t,
            &mut count,
        )
    };
    if kr != libc::KERN_SUCCESS {
        tracing::warn!("host_statistics64 failed: {}", kr);
        return MemoryStats::default();
    }
    // SAFETY: sysconf has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(0) as u64;
    let pages = |count: libc::natural_t| u64::from(count).saturating_mul(page_size);
    MemoryStats {
        usable: pages(stats.active_count)
            + pages(stats.inactive_count)
            + pages(stats.wire_count)
            + pages(stats.free_count),
        free: pages(stats.free_count),
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub fn memory_stats() -> MemoryStats {
    MemoryStats::default()
}

pub fn write_memory_info(writer: &mut dyn ReportWriter, key: Option<&str>, stats: &MemoryStats) {
    writer.begin_object(key);
    writer.add_unsigned(Some(fields::USABLE), stats.usable);
    writer.add_unsigned(Some(fields::FREE), stats.free);
    writer.end_container();
}

pub fn write_app_stats(writer: &mut dyn ReportWriter, key: Option<&str>, state: &AppState) {
    writer.begin_object(key);
    writer.add_boolean(Some(fields::APP_ACTIVE), state.application_active);
    writer.add_boolean(Some(fields::APP_IN_FOREGROUND), state.application_in_foreground);

    writer.add_integer(Some(fields::LAUNCHES_SINCE_CRASH), state.launches_since_last_crash);
    writer.add_integer(Some(fields::SESSIONS_SINCE_CRASH), state.sessions_since_last_crash);
    writer.add_float(Some(fields::ACTIVE_TIME_SINCE_CRASH), state.active_duration_since_last_crash);
    writer.add_float(Some(fields::BG_TIME_SINCE_CRASH), state.background_duration_since_last_crash);

    writer.add_integer(Some(fields::SESSIONS_SINCE_LAUNCH), state.sessions_since_launch);
    writer.add_float(Some(fields::ACTIVE_TIME_SINCE_LAUNCH), state.active_duration_since_launch);
    writer.add_float(Some(fields::BG_TIME_SINCE_LAUNCH), state.background_duration_since_launch);
    writer.end_container();
}

#[cfg(test)]
mod test {
    use super::*;
    use crashwrite_json::JsonReportWriter;
    use serde_json::Value;

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn test_memory_stats() {
        let stats = memory_stats();
        assert!(stats.usable > 0);
        assert!(stats.free <= stats.usable);
    }

    #[test]
    fn test_app_stats() {
        let state = AppState {
            application_active: true,
            launches_since_last_crash: 3,
            sessions_since_last_crash: 5,
            active_duration_since_last_crash: 12.5,
            sessions_since_launch: 1,
            ..AppState::default()
        };
        let mut writer = JsonReportWriter::new(Vec::new());
        write_app_stats(&mut writer, None, &state);
        let value: Value = serde_json::from_slice(&writer.finish().unwrap()).unwrap();
        assert_eq!(value["application_active"], true);
        assert_eq!(value["application_in_foreground"], false);
        assert_eq!(value["launches_since_last_crash"], 3);
        assert_eq!(value["sessions_since_last_crash"], 5);
        assert_eq!(value["active_time_since_last_crash"], 12.5);
        assert_eq!(value["background_time_since_launch"], 0.0);
        assert_eq!(value.as_object().unwrap().len(), 9);
    }
}
