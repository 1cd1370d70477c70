//! Bucketing planner tests: size bounds, coverage, balance and the
//! short-list base case.

#[cfg(test)]
mod tests {
    use crate::compaction::{Bucket, make_buckets};
    use std::collections::HashSet;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i:03}")).collect()
    }

    fn sizes(buckets: &[Bucket]) -> Vec<usize> {
        buckets.iter().map(Bucket::len).collect()
    }

    /// # Scenario
    /// Ten files with the default bounds `[2, 8]`.
    ///
    /// # Expected behavior
    /// The list is halved into two buckets of five rather than cut into
    /// eight plus two.
    #[test]
    fn ten_files_split_evenly() {
        let files = names(10);
        let buckets = make_buckets(&files, 2, 8);
        assert_eq!(sizes(&buckets), vec![5, 5]);
        assert_eq!(buckets[0].files(), &files[..5]);
        assert_eq!(buckets[1].files(), &files[5..]);
        assert!(buckets.iter().all(|b| !b.is_processed()));
    }

    #[test]
    fn within_bounds_is_one_bucket() {
        assert_eq!(sizes(&make_buckets(&names(2), 2, 8)), vec![2]);
        assert_eq!(sizes(&make_buckets(&names(5), 2, 8)), vec![5]);
        assert_eq!(sizes(&make_buckets(&names(8), 2, 8)), vec![8]);
    }

    #[test]
    fn odd_split_puts_extra_file_on_the_right() {
        assert_eq!(sizes(&make_buckets(&names(9), 2, 8)), vec![4, 5]);
        assert_eq!(sizes(&make_buckets(&names(17), 2, 8)), vec![8, 4, 5]);
    }

    /// # Scenario
    /// Lists shorter than the minimum, including empty and single-file.
    ///
    /// # Expected behavior
    /// No bucket is produced; nothing is force-merged.
    #[test]
    fn short_lists_produce_nothing() {
        assert!(make_buckets(&names(0), 2, 8).is_empty());
        assert!(make_buckets(&names(1), 2, 8).is_empty());
        assert!(make_buckets(&names(2), 3, 8).is_empty());
    }

    /// # Scenario
    /// `min == max == 3` with seven files: 7 → 3 + 4, and 4 → 2 + 2.
    ///
    /// # Expected behavior
    /// Only the three-file half forms a bucket; the other four files are
    /// left for a later run.
    #[test]
    fn unplaceable_files_are_left_alone() {
        let files = names(7);
        let buckets = make_buckets(&files, 3, 3);
        assert_eq!(sizes(&buckets), vec![3]);
        assert_eq!(buckets[0].files(), &files[..3]);
    }

    /// # Scenario
    /// Every list length up to 200 under several bounds.
    ///
    /// # Expected behavior
    /// Each bucket respects the bounds, no file is assigned twice, and
    /// concatenating the buckets preserves the input order.
    #[test]
    fn bounds_coverage_and_order_hold_for_all_lengths() {
        for (min, max) in [(2, 2), (2, 3), (2, 8), (3, 5), (4, 32)] {
            for n in 0..=200 {
                let files = names(n);
                let buckets = make_buckets(&files, min, max);

                let mut seen = HashSet::new();
                let mut last_index = None;
                for bucket in &buckets {
                    assert!(
                        (min..=max).contains(&bucket.len()),
                        "n={n} min={min} max={max} bucket={}",
                        bucket.len()
                    );
                    for file in bucket.files() {
                        assert!(seen.insert(file.clone()), "{file} assigned twice");
                        let idx = files.iter().position(|f| f == file).unwrap();
                        assert!(last_index.is_none_or(|last| idx > last));
                        last_index = Some(idx);
                    }
                }

                // Halves never drop below two files once max >= 3.
                if min == 2 && max >= 3 && n >= 2 {
                    assert_eq!(seen.len(), n, "n={n} max={max}");
                }
            }
        }
    }
}
