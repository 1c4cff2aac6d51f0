use std::collections::HashSet;
use std::hash::Hash;

/// Concatenates `primary` and `secondary`, keeping only the first occurrence of each element
///
/// Relative order within each input is preserved and neither input is modified.
pub fn merge_unique_ordered<T: Clone + Eq + Hash>(primary: &[T], secondary: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(primary.len() + secondary.len());

    primary
        .iter()
        .chain(secondary.iter())
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}
