//! Narrowing the link list to this run's window and cutting it into per-session chunks.

use crate::models::{BatchWindow, LinkEntry};

/// Entries whose row falls inside `window`, in input order.
pub fn select_window(links: Vec<LinkEntry>, window: BatchWindow) -> Vec<LinkEntry> {
    links
        .into_iter()
        .filter(|l| window.contains(l.row_index))
        .collect()
}

/// Split into consecutive chunks of at most `size` entries (a size of 0 is treated as 1).
pub fn into_chunks(links: Vec<LinkEntry>, size: usize) -> Vec<Vec<LinkEntry>> {
    links.chunks(size.max(1)).map(<[LinkEntry]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entries(rows: &[u32]) -> Vec<LinkEntry> {
        rows.iter()
            .map(|&r| LinkEntry::new(r, format!("https://charts.example.com/{r}")))
            .collect()
    }

    #[test]
    fn test_window_bounds() {
        let links = entries(&[2, 3, 4, 5, 6, 7]);
        let window = BatchWindow { batch_index: 1, batch_size: 2 };
        let rows: Vec<u32> = select_window(links, window).iter().map(|l| l.row_index).collect();
        assert_eq!(rows, vec![4, 5]);
    }

    #[test]
    fn test_window_past_the_end_is_empty() {
        let window = BatchWindow { batch_index: 5, batch_size: 151 };
        assert!(select_window(entries(&[2, 3]), window).is_empty());
    }

    #[test]
    fn test_chunk_sizes() {
        let chunks = into_chunks(entries(&[2, 3, 4, 5, 6]), 2);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(into_chunks(entries(&[2]), 0).len(), 1);
        assert!(into_chunks(Vec::new(), 20).is_empty());
    }

    fn arb_rows() -> impl Strategy<Value = Vec<u32>> {
        prop::collection::btree_set(2u32..400, 0..120).prop_map(|s| s.into_iter().collect())
    }

    proptest! {
        /// Window + chunking covers every in-window entry exactly once, in order.
        #[test]
        fn chunks_cover_window_exactly_once(
            rows in arb_rows(),
            batch_index in 0u32..4,
            batch_size in 1u32..200,
            chunk_size in 1usize..30,
        ) {
            let window = BatchWindow { batch_index, batch_size };
            let links = entries(&rows);
            let expected: Vec<LinkEntry> =
                links.iter().filter(|l| window.contains(l.row_index)).cloned().collect();

            let chunks = into_chunks(select_window(links, window), chunk_size);

            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= chunk_size));
            let flattened: Vec<LinkEntry> = chunks.into_iter().flatten().collect();
            prop_assert_eq!(flattened, expected);
        }

        /// Consecutive batch indices partition the rows without overlap.
        #[test]
        fn adjacent_windows_do_not_overlap(rows in arb_rows(), batch_size in 1u32..100) {
            let first = BatchWindow { batch_index: 0, batch_size };
            let second = BatchWindow { batch_index: 1, batch_size };
            let a = select_window(entries(&rows), first);
            let b = select_window(entries(&rows), second);
            prop_assert!(a.iter().all(|l| !b.contains(l)));
            prop_assert_eq!(first.last_row() + 1, second.first_row());
        }
    }
}
