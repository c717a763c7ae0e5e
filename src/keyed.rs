//! Operators over ordered keyed collections. Each states its key type and
//! what happens on a duplicate or a missing key.
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use crate::domain::KeyMiss;
use crate::error::KiraError;

/// Index where every key must appear once. A repeated key is a
/// [`KiraError::Correspondence`].
pub fn index_unique<K, V, I>(items: I, what: &str) -> Result<HashMap<K, V>, KiraError>
where
    K: Eq + Hash + Display,
    I: IntoIterator<Item = (K, V)>,
{
    let mut index = HashMap::new();
    for (key, value) in items {
        if index.contains_key(&key) {
            return Err(KiraError::Correspondence(format!("duplicate {what} for key {key}")));
        }
        index.insert(key, value);
    }
    Ok(index)
}

#[derive(Debug)]
pub struct Joined<O, L> {
    pub matched: Vec<O>,
    pub dropped: Vec<L>,
}

/// Inner join of `left` against a unique index, keeping left order.
/// Left items without a partner are rejected or collected in `dropped`.
pub fn join<K, L, R, O>(
    left: Vec<L>,
    left_key: impl Fn(&L) -> &K,
    index: &HashMap<K, R>,
    miss: KeyMiss,
    combine: impl Fn(L, &R) -> O,
) -> Result<Joined<O, L>, KiraError>
where
    K: Eq + Hash + Display,
{
    let mut matched = Vec::with_capacity(left.len());
    let mut dropped = Vec::new();
    for item in left {
        match index.get(left_key(&item)) {
            Some(partner) => matched.push(combine(item, partner)),
            None => match miss {
                KeyMiss::Reject => {
                    return Err(KiraError::Correspondence(format!(
                        "no partner for key {}",
                        left_key(&item)
                    )));
                }
                KeyMiss::Drop => dropped.push(item),
            },
        }
    }
    Ok(Joined { matched, dropped })
}

/// Stable grouping: groups come in first-appearance order of their key and
/// items keep their input order inside a group.
pub fn group_by<K, V, I>(items: I, key: impl Fn(&V) -> K) -> Vec<(K, Vec<V>)>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = V>,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<V>)> = Vec::new();
    for item in items {
        let k = key(&item);
        match positions.get(&k) {
            Some(&position) => groups[position].1.push(item),
            None => {
                positions.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    groups
}

/// Checks that no key occurs twice in `items`.
pub fn ensure_unique<'a, K, T>(
    items: &'a [T],
    key: impl Fn(&'a T) -> K,
    what: &str,
) -> Result<(), KiraError>
where
    K: Eq + Hash + std::fmt::Debug,
{
    let mut seen = HashSet::new();
    for item in items {
        let k = key(item);
        if seen.contains(&k) {
            return Err(KiraError::Correspondence(format!("duplicate {what} {k:?}")));
        }
        seen.insert(k);
    }
    Ok(())
}
