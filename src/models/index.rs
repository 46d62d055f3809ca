//! Combined episode/part index helpers.
//!
//! A `combi_index` packs `(total_index, partial_index)` into one number by
//! reading `"{total}.{partial}"` as a decimal. `5` with partial `12` becomes
//! `5.12`, `-1` with partial `5` becomes `-1.5`.

/// Combine a total index and an optional partial index into one number.
///
/// A partial index of `0` is the same as having none.
pub fn combi_index(total_index: i64, partial_index: Option<i64>) -> f64 {
    match partial_index {
        Some(partial) if partial > 0 => format!("{}.{}", total_index, partial)
            .parse()
            .unwrap_or(total_index as f64),
        _ => total_index as f64,
    }
}

/// Split a combined index back into `(total_index, partial_index)`.
pub fn separate_index(combi_index: f64) -> (i64, Option<i64>) {
    let text = format!("{}", combi_index);
    match text.split_once('.') {
        Some((total, partial)) => {
            let total = total.parse::<i64>().unwrap_or(0);
            let partial = partial.parse::<i64>().ok().filter(|p| *p > 0);
            (total, partial)
        }
        None => (combi_index as i64, None),
    }
}

/// Title used when a scraped node has none.
pub fn synthesize_title(prefix: &str, total_index: i64, partial_index: Option<i64>) -> String {
    match partial_index {
        Some(partial) if partial > 0 => format!("{} {}.{}", prefix, total_index, partial),
        _ => format!("{} {}", prefix, total_index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combi_index() {
        assert_eq!(combi_index(5, None), 5.0);
        assert_eq!(combi_index(5, Some(12)), 5.12);
        assert_eq!(combi_index(5, Some(0)), 5.0);
        assert_eq!(combi_index(-1, Some(5)), -1.5);
        assert_eq!(combi_index(120, Some(1)), 120.1);
    }

    #[test]
    fn test_separate_index_round_trip() {
        let cases = [
            (1, None),
            (1, Some(5)),
            (12, Some(25)),
            (-1, None),
            (-1, Some(3)),
            (1000, Some(999)),
        ];
        for (total, partial) in cases {
            assert_eq!(
                separate_index(combi_index(total, partial)),
                (total, partial),
                "round trip failed for {total} / {partial:?}"
            );
        }
    }

    #[test]
    fn test_combi_index_distinguishes_partials() {
        assert_ne!(combi_index(3, Some(1)), combi_index(3, Some(11)));
        assert_ne!(combi_index(3, Some(2)), combi_index(3, Some(21)));
    }

    #[test]
    fn test_trailing_zero_partials_collide() {
        // Decimal reading: partial 10 is indistinguishable from partial 1.
        assert_eq!(combi_index(5, Some(10)), combi_index(5, Some(1)));
        assert_eq!(combi_index(5, Some(10)), 5.1);
        assert_eq!(separate_index(combi_index(5, Some(10))), (5, Some(1)));
        assert_eq!(combi_index(7, Some(20)), combi_index(7, Some(2)));
    }

    #[test]
    fn test_synthesize_title() {
        assert_eq!(synthesize_title("Episode", 4, None), "Episode 4");
        assert_eq!(synthesize_title("Volume", 2, Some(5)), "Volume 2.5");
    }
}
