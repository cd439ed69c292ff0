//! Process statistics from /proc.
//!
//! CPU percent is a two-point sample: cumulative user+system ticks, a one
//! second sleep, and a second read. Tick resolution comes from
//! `sysconf(_SC_CLK_TCK)` with the conventional fallback of 100.

use std::path::Path;
use std::time::Duration;

use orama_core::{Error, Result};

/// Clock ticks per second for /proc time fields.
pub fn ticks_per_second() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 { 100 } else { ticks as u64 }
}

/// Cumulative utime+stime ticks for a pid.
pub fn read_cpu_ticks(pid: u32) -> Result<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"))?;
    parse_cpu_ticks(&stat)
        .ok_or_else(|| Error::internal(format!("malformed /proc/{pid}/stat")))
}

/// Sample CPU percent over one second.
pub async fn sample_cpu_percent(pid: u32) -> Result<f64> {
    let before = read_cpu_ticks(pid)?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let after = read_cpu_ticks(pid)?;
    let delta = after.saturating_sub(before);
    Ok(delta as f64 / ticks_per_second() as f64 * 100.0)
}

/// Resident set size in bytes from /proc/<pid>/status.
pub fn read_rss_bytes(pid: u32) -> Result<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))?;
    parse_vmrss_bytes(&status)
        .ok_or_else(|| Error::internal(format!("no VmRSS in /proc/{pid}/status")))
}

/// Seconds the process has been running, from its start tick and the
/// system uptime.
pub fn process_uptime_s(pid: u32) -> Result<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"))?;
    let start_ticks = parse_start_ticks(&stat)
        .ok_or_else(|| Error::internal(format!("malformed /proc/{pid}/stat")))?;
    let uptime = std::fs::read_to_string("/proc/uptime")?;
    let system_uptime_s: f64 = uptime
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::internal("malformed /proc/uptime"))?;
    let started_s = start_ticks as f64 / ticks_per_second() as f64;
    Ok((system_uptime_s - started_s).max(0.0) as u64)
}

/// Total on-disk size of a directory tree.
pub fn dir_size_bytes(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// The comm field may contain spaces; real fields start after the last
/// closing paren.
fn fields_after_comm(stat: &str) -> Option<Vec<&str>> {
    let after = stat.rsplit_once(')')?.1;
    Some(after.split_whitespace().collect())
}

/// utime (field 14) + stime (field 15).
pub fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let fields = fields_after_comm(stat)?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// starttime (field 22), in ticks since boot.
fn parse_start_ticks(stat: &str) -> Option<u64> {
    fields_after_comm(stat)?.get(19)?.parse().ok()
}

/// VmRSS is reported in kB.
pub fn parse_vmrss_bytes(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
