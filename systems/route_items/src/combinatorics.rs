//! Bounded enumeration helpers used by the generator.

use fire_rescue_core::VertexId;

/// Every size-`size` subset of `pool`, each in ascending pool order.
pub(crate) fn combinations(pool: &[VertexId], size: usize) -> Vec<Vec<VertexId>> {
    let mut out = Vec::new();
    if size == 0 || size > pool.len() {
        return out;
    }
    let mut current = Vec::with_capacity(size);
    extend_combinations(pool, size, 0, &mut current, &mut out);
    out
}

fn extend_combinations(
    pool: &[VertexId],
    size: usize,
    start: usize,
    current: &mut Vec<VertexId>,
    out: &mut Vec<Vec<VertexId>>,
) {
    if current.len() == size {
        out.push(current.clone());
        return;
    }
    let needed = size - current.len();
    for index in start..=pool.len() - needed {
        current.push(pool[index]);
        extend_combinations(pool, size, index + 1, current, out);
        let _ = current.pop();
    }
}

/// Count vectors assigning at least one person to every slot.
///
/// `available[i]` bounds slot `i` from above and the total never exceeds
/// `capacity`. Built by recursive partitioning so slots only receive counts
/// that still leave one person for each remaining slot.
pub(crate) fn count_vectors(available: &[u32], capacity: u32) -> Vec<Vec<u32>> {
    let mut out = Vec::new();
    let slots = u32::try_from(available.len()).unwrap_or(u32::MAX);
    if available.is_empty() || slots > capacity || available.contains(&0) {
        return out;
    }
    let mut current = Vec::with_capacity(available.len());
    extend_vectors(available, capacity, &mut current, &mut out);
    out
}

fn extend_vectors(
    available: &[u32],
    remaining: u32,
    current: &mut Vec<u32>,
    out: &mut Vec<Vec<u32>>,
) {
    let slot = current.len();
    if slot == available.len() {
        out.push(current.clone());
        return;
    }
    let slots_after = u32::try_from(available.len() - slot - 1).unwrap_or(u32::MAX);
    let upper = available[slot].min(remaining.saturating_sub(slots_after));
    for count in 1..=upper {
        current.push(count);
        extend_vectors(available, remaining - count, current, out);
        let _ = current.pop();
    }
}

/// Rearranges `items` into the next lexicographic permutation.
///
/// Returns `false` (leaving the slice sorted ascending) once the last
/// permutation has been passed.
pub(crate) fn next_permutation(items: &mut [VertexId]) -> bool {
    if items.len() < 2 {
        return false;
    }
    let mut pivot = items.len() - 1;
    while pivot > 0 && items[pivot - 1] >= items[pivot] {
        pivot -= 1;
    }
    if pivot == 0 {
        items.reverse();
        return false;
    }
    let mut successor = items.len() - 1;
    while items[successor] <= items[pivot - 1] {
        successor -= 1;
    }
    items.swap(pivot - 1, successor);
    items[pivot..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u32]) -> Vec<VertexId> {
        values.iter().copied().map(VertexId::new).collect()
    }

    #[test]
    fn combinations_cover_binomial_count() {
        let pool = ids(&[1, 2, 3, 4, 5]);
        assert_eq!(combinations(&pool, 1).len(), 5);
        assert_eq!(combinations(&pool, 2).len(), 10);
        assert_eq!(combinations(&pool, 3).len(), 10);
        assert_eq!(combinations(&pool, 5), vec![pool.clone()]);
        assert!(combinations(&pool, 6).is_empty());
    }

    #[test]
    fn count_vectors_respect_capacity_and_availability() {
        let vectors = count_vectors(&[2, 5], 3);
        assert_eq!(vectors, vec![vec![1, 1], vec![1, 2], vec![2, 1]]);

        assert_eq!(count_vectors(&[4], 3), vec![vec![1], vec![2], vec![3]]);
        assert!(count_vectors(&[1, 1, 1, 1], 3).is_empty());
    }

    #[test]
    fn permutations_visit_every_ordering_once() {
        let mut items = ids(&[1, 2, 3]);
        let mut seen = vec![items.clone()];
        while next_permutation(&mut items) {
            seen.push(items.clone());
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(items, ids(&[1, 2, 3]));
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }
}
