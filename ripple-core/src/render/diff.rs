//! Keyed sequence diff.
//!
//! Given the previous and the next key order of a list, work out which
//! items are removed, which are new, and which retained items can stay
//! where they are. The stable set is a longest increasing subsequence of
//! the retained items' old positions, so the number of moves is minimal.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// The edit from one key order to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedDiff {
    /// For each new position, the old position of the same key, or `None`
    /// for a new key.
    pub sources: Vec<Option<usize>>,
    /// Old positions whose keys are gone, ascending.
    pub removed: Vec<usize>,
    /// For each new position, whether a retained item keeps its place
    /// relative to the other stable items.
    pub stable: Vec<bool>,
}

impl KeyedDiff {
    /// Retained items that have to move.
    pub fn moves(&self) -> usize {
        self.sources
            .iter()
            .zip(&self.stable)
            .filter(|(src, stable)| src.is_some() && !**stable)
            .count()
    }

    /// New keys.
    pub fn additions(&self) -> usize {
        self.sources.iter().filter(|src| src.is_none()).count()
    }
}

/// Diff two key sequences. Keys must be unique within each sequence.
pub fn diff_keys<K: Eq + Hash>(old: &[K], new: &[K]) -> KeyedDiff {
    let old_index: HashMap<&K, usize> = old.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let sources: Vec<Option<usize>> = new.iter().map(|k| old_index.get(k).copied()).collect();

    let mut kept = vec![false; old.len()];
    for src in sources.iter().flatten() {
        kept[*src] = true;
    }
    let removed = (0..old.len()).filter(|i| !kept[*i]).collect();

    let retained: Vec<(usize, usize)> = sources
        .iter()
        .enumerate()
        .filter_map(|(new_pos, src)| src.map(|old_pos| (new_pos, old_pos)))
        .collect();
    let olds: Vec<usize> = retained.iter().map(|(_, old_pos)| *old_pos).collect();

    let mut stable = vec![false; new.len()];
    for idx in longest_increasing_subsequence(&olds) {
        stable[retained[idx].0] = true;
    }

    KeyedDiff {
        sources,
        removed,
        stable,
    }
}

/// Indices into `seq` forming one longest strictly increasing subsequence.
pub fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[k]: index of the smallest tail of an increasing run of length k+1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < *value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}

/// Make keys unique: the n-th repeat of a key becomes `"{key}#{n}"`, or the
/// next free suffix when that name is already in the list.
///
/// Returns the keys that were repeated.
pub fn dedupe_keys(keys: &mut [String]) -> Vec<String> {
    let mut taken: HashSet<String> = keys.iter().cloned().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut repeated = Vec::new();
    for key in keys.iter_mut() {
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            continue;
        }
        let mut n = *count;
        let mut renamed = format!("{key}#{n}");
        while taken.contains(&renamed) {
            n += 1;
            renamed = format!("{key}#{n}");
        }
        taken.insert(renamed.clone());
        repeated.push(std::mem::replace(key, renamed));
    }
    repeated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_moves_a_single_item() {
        let diff = diff_keys(&["A", "B", "C"], &["C", "A", "B"]);
        assert_eq!(diff.sources, vec![Some(2), Some(0), Some(1)]);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.stable, vec![false, true, true]);
        assert_eq!(diff.moves(), 1);
        assert_eq!(diff.additions(), 0);
    }

    #[test]
    fn append_and_remove() {
        let diff = diff_keys(&["1"], &["1", "2"]);
        assert_eq!(diff.sources, vec![Some(0), None]);
        assert_eq!(diff.moves(), 0);
        assert_eq!(diff.additions(), 1);

        let diff = diff_keys(&["1", "2"], &["2"]);
        assert_eq!(diff.removed, vec![0]);
        assert_eq!(diff.stable, vec![true]);
    }

    #[test]
    fn reversal_keeps_one_stable() {
        let diff = diff_keys(&[1, 2, 3, 4], &[4, 3, 2, 1]);
        assert_eq!(diff.moves(), 3);
    }

    #[test]
    fn lis_picks_a_longest_run() {
        let seq = [3, 1, 4, 1, 5, 9, 2, 6];
        let picked = longest_increasing_subsequence(&seq);
        assert_eq!(picked.len(), 4);
        assert!(picked.windows(2).all(|w| seq[w[0]] < seq[w[1]]));
        assert!(longest_increasing_subsequence(&[]).is_empty());
    }

    #[test]
    fn duplicates_get_suffixes() {
        let mut keys: Vec<String> = ["a", "b", "a", "a"].iter().map(|s| s.to_string()).collect();
        let repeated = dedupe_keys(&mut keys);
        assert_eq!(keys, vec!["a", "b", "a#2", "a#3"]);
        assert_eq!(repeated, vec!["a", "a"]);
    }

    #[test]
    fn suffixes_skip_keys_already_in_the_list() {
        let mut keys: Vec<String> = ["a#2", "a", "a"].iter().map(|s| s.to_string()).collect();
        let repeated = dedupe_keys(&mut keys);
        assert_eq!(keys, vec!["a#2", "a", "a#3"]);
        assert_eq!(repeated, vec!["a"]);

        let diff = diff_keys(&keys, &keys);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.sources, vec![Some(0), Some(1), Some(2)]);
    }
}
