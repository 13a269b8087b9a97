//! Victim selection.

use super::deque::Stealer;
use crate::util::DetRng;

/// Tries to steal a task from a list of stealers, skipping the caller's own
/// deque at index `own`.
///
/// Starts at a random index and tries every other deque once.
pub(crate) fn steal_task<T>(stealers: &[Stealer<T>], own: usize, rng: &mut DetRng) -> Option<T> {
    let len = stealers.len();
    if len <= 1 {
        return None;
    }
    let start = rng.next_usize(len);
    (0..len)
        .map(|i| (start + i) % len)
        .filter(|&idx| idx != own)
        .find_map(|idx| stealers[idx].steal())
}
