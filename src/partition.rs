//! Fair partitioning of a message budget across workers.

/// Split `total` messages across `workers` quotas.
///
/// Every worker receives `total / workers`; the remainder is handed out one
/// message at a time to the lowest-indexed workers, so the quotas always sum
/// to `total` and differ by at most one. The result is deterministic, which
/// keeps repeated runs with the same arguments on the same per-worker load.
///
/// Returns an empty vector when `workers` is zero.
///
/// ```rust
/// # use stomp_bench::partition::partition;
/// assert_eq!(partition(10, 3), vec![4, 3, 3]);
/// assert!(partition(10, 0).is_empty());
/// ```
pub fn partition(total: u64, workers: usize) -> Vec<u64> {
    if workers == 0 {
        return Vec::new();
    }

    let count = workers as u64;
    let base = total / count;
    let remainder = (total % count) as usize;

    (0..workers)
        .map(|index| if index < remainder { base + 1 } else { base })
        .collect()
}
