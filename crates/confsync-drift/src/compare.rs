//! Tree comparison
//!
//! [`diff_trees`] walks a baseline and a current tree side by side. Every
//! step matches on the *pair* of variants actually present, so a value
//! that changed shape (a list where the baseline has a scalar, say) is one
//! `value_mismatch` and the walk never descends into it.

use confsync_model::{ConfigTree, DriftKind, KeyPath, Scalar};

/// One unscored divergence
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub key_path: KeyPath,
    pub kind: DriftKind,
    pub baseline: Option<ConfigTree>,
    pub current: Option<ConfigTree>,
    pub reason: String,
}

/// Every divergence between `baseline` and `current`, in walk order
#[must_use]
pub fn diff_trees(baseline: &ConfigTree, current: &ConfigTree) -> Vec<Divergence> {
    let mut out = Vec::new();
    walk(&KeyPath::root(), baseline, current, &mut out);
    out
}

fn walk(at: &KeyPath, baseline: &ConfigTree, current: &ConfigTree, out: &mut Vec<Divergence>) {
    match (baseline, current) {
        (ConfigTree::Map(b), ConfigTree::Map(c)) => {
            for (key, b_value) in b {
                let path = at.child(key.clone());
                match c.get(key) {
                    Some(c_value) => walk(&path, b_value, c_value, out),
                    None => out.push(Divergence {
                        reason: format!("'{path}' is missing"),
                        key_path: path,
                        kind: DriftKind::Missing,
                        baseline: Some(b_value.clone()),
                        current: None,
                    }),
                }
            }
            for (key, c_value) in c {
                if !b.contains_key(key) {
                    let path = at.child(key.clone());
                    out.push(Divergence {
                        reason: format!("'{path}' is not in the baseline"),
                        key_path: path,
                        kind: DriftKind::Unexpected,
                        baseline: None,
                        current: Some(c_value.clone()),
                    });
                }
            }
        }
        (ConfigTree::List(b), ConfigTree::List(c)) => {
            let same = b.len() == c.len() && b.iter().zip(c).all(|(x, y)| equivalent(x, y));
            if !same {
                let reason = if b.len() == c.len() {
                    "list elements differ".to_string()
                } else {
                    format!("list has {} entries, baseline has {}", c.len(), b.len())
                };
                out.push(Divergence {
                    key_path: at.clone(),
                    kind: DriftKind::ListChanged,
                    baseline: Some(baseline.clone()),
                    current: Some(current.clone()),
                    reason,
                });
            }
        }
        (ConfigTree::Scalar(b), ConfigTree::Scalar(c)) => {
            if !b.loosely_eq(c) {
                out.push(Divergence {
                    key_path: at.clone(),
                    kind: DriftKind::ValueMismatch,
                    baseline: Some(baseline.clone()),
                    current: Some(current.clone()),
                    reason: format!("expected {}, found {}", b.render(), c.render()),
                });
            }
        }
        (ConfigTree::Map(_), ConfigTree::List(_) | ConfigTree::Scalar(_))
        | (ConfigTree::List(_), ConfigTree::Map(_) | ConfigTree::Scalar(_))
        | (ConfigTree::Scalar(_), ConfigTree::Map(_) | ConfigTree::List(_)) => {
            out.push(Divergence {
                key_path: at.clone(),
                kind: DriftKind::ValueMismatch,
                baseline: Some(baseline.clone()),
                current: Some(current.clone()),
                reason: format!(
                    "shape changed: baseline is a {}, current is a {}",
                    baseline.kind_name(),
                    current.kind_name()
                ),
            });
        }
    }
}

/// Tolerant structural equality (scalars compare loosely)
#[must_use]
pub fn equivalent(a: &ConfigTree, b: &ConfigTree) -> bool {
    match (a, b) {
        (ConfigTree::Scalar(x), ConfigTree::Scalar(y)) => Scalar::loosely_eq(x, y),
        (ConfigTree::List(x), ConfigTree::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| equivalent(p, q))
        }
        (ConfigTree::Map(x), ConfigTree::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| equivalent(v, w)))
        }
        _ => false,
    }
}
