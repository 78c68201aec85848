/// Wall-clock milliseconds since the Unix epoch.
///
/// Advisory only: protocol ordering never depends on these values.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
