use std::collections::BTreeMap;

use crate::models::MergeRule;

/// Combine refinement outputs into one result.
///
/// `outputs` pairs each output with the index of the worker that produced it.
/// The result depends only on that set, never on the order it arrives in.
/// Returns `None` when there is nothing to merge.
pub fn merge_outputs(rule: MergeRule, outputs: &[(usize, Vec<u8>)]) -> Option<Vec<u8>> {
    if outputs.is_empty() {
        return None;
    }

    let mut ordered: Vec<&(usize, Vec<u8>)> = outputs.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let merged = match rule {
        MergeRule::Vote => vote(&ordered),
        MergeRule::Precedence => ordered[0].1.clone(),
        MergeRule::Concatenate => {
            let mut joined = Vec::new();
            for (position, (_, output)) in ordered.iter().enumerate() {
                if position > 0 {
                    joined.push(b'\n');
                }
                joined.extend_from_slice(output);
            }
            joined
        }
    };

    Some(merged)
}

fn vote(ordered: &[&(usize, Vec<u8>)]) -> Vec<u8> {
    let mut tally: BTreeMap<&[u8], usize> = BTreeMap::new();
    for (_, output) in ordered {
        *tally.entry(output.as_slice()).or_default() += 1;
    }

    // BTreeMap iterates in byte order, so a strict comparison keeps the
    // smallest output among equal counts.
    let mut winner: Option<(&[u8], usize)> = None;
    for (output, count) in tally {
        if winner.map_or(true, |(_, best)| count > best) {
            winner = Some((output, count));
        }
    }
    winner.map(|(output, _)| output.to_vec()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(items: &[(usize, &str)]) -> Vec<(usize, Vec<u8>)> {
        items
            .iter()
            .map(|(index, text)| (*index, text.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn vote_picks_majority() {
        let merged = merge_outputs(
            MergeRule::Vote,
            &outputs(&[(0, "b"), (1, "a"), (2, "b"), (3, "c")]),
        );
        assert_eq!(merged, Some(b"b".to_vec()));
    }

    #[test]
    fn vote_tie_goes_to_smallest_output() {
        let merged = merge_outputs(
            MergeRule::Vote,
            &outputs(&[(0, "zeta"), (1, "alpha"), (2, "zeta"), (3, "alpha")]),
        );
        assert_eq!(merged, Some(b"alpha".to_vec()));
    }

    #[test]
    fn precedence_uses_lowest_worker_index() {
        let merged = merge_outputs(MergeRule::Precedence, &outputs(&[(4, "late"), (2, "early")]));
        assert_eq!(merged, Some(b"early".to_vec()));
    }

    #[test]
    fn concatenate_orders_by_worker_index() {
        let merged = merge_outputs(
            MergeRule::Concatenate,
            &outputs(&[(2, "c"), (0, "a"), (1, "b")]),
        );
        assert_eq!(merged, Some(b"a\nb\nc".to_vec()));
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let base = outputs(&[(0, "x"), (1, "y"), (2, "x"), (3, "z"), (4, "y"), (5, "y")]);
        for rule in [MergeRule::Vote, MergeRule::Precedence, MergeRule::Concatenate] {
            let expected = merge_outputs(rule, &base);

            let mut reversed = base.clone();
            reversed.reverse();
            assert_eq!(merge_outputs(rule, &reversed), expected);

            let mut rotated = base.clone();
            rotated.rotate_left(2);
            assert_eq!(merge_outputs(rule, &rotated), expected);
        }
    }

    #[test]
    fn nothing_to_merge() {
        assert_eq!(merge_outputs(MergeRule::Vote, &[]), None);
    }
}
