// src/flow/dedup.rs

//! Deduplication of equivalent job requests while a work is being built.
//!
//! [`canonicalize`] reduces the physically meaningful parameters of a
//! prospective task to a [`Fingerprint`]; a [`DedupIndex`] maps fingerprints
//! to the task already registered for them within one construction pass.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dag::Vars;
use crate::errors::{FlowError, Result};
use crate::types::TaskKind;

/// Default snapping tolerance for floating-point parameters.
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Which parameters participate in a fingerprint, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRules {
    /// Parameter names that matter. Everything else is ignored.
    pub keys: BTreeSet<String>,
    /// Floats are snapped to multiples of this value.
    pub tolerance: f64,
    /// Keys holding reduced coordinates; components are folded into `[0, 1)`
    /// so that points differing by a lattice vector compare equal.
    pub reduced: BTreeSet<String>,
}

impl CanonicalRules {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            tolerance: DEFAULT_TOLERANCE,
            reduced: BTreeSet::new(),
        }
    }

    /// Snap floats to multiples of `tolerance`, which must be finite and in
    /// `(0, 0.5]`.
    pub fn with_tolerance(mut self, tolerance: f64) -> Result<Self> {
        if !valid_tolerance(tolerance) {
            return Err(FlowError::config(format!(
                "dedup tolerance must lie in (0, 0.5], got {tolerance}"
            )));
        }
        self.tolerance = tolerance;
        Ok(self)
    }

    /// Treat `key` as reduced coordinates (it also becomes a relevant key).
    pub fn reduced(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.keys.insert(key.clone());
        self.reduced.insert(key);
        self
    }

    /// Rules for q-point based perturbation tasks.
    pub fn qpoint() -> Self {
        CanonicalRules::new(Vec::<String>::new()).reduced("qpt")
    }
}

/// Canonical key of a job request: a blake3 digest of its canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..16.min(self.0.len())])
    }
}

/// Pure function from the relevant parameters of a job to its fingerprint.
///
/// Key order, whitespace around strings and parameters not named in `rules`
/// do not affect the result. The kind always participates.
pub fn canonicalize(kind: TaskKind, params: &Vars, rules: &CanonicalRules) -> Fingerprint {
    // `tolerance` is a public field; an unusable value falls back to the default.
    let tol = if valid_tolerance(rules.tolerance) {
        rules.tolerance
    } else {
        DEFAULT_TOLERANCE
    };
    let mut buf = String::new();
    buf.push_str(&kind.to_string());

    for key in &rules.keys {
        buf.push('|');
        buf.push_str(key);
        buf.push('=');
        let fold = rules.reduced.contains(key);
        match params.get(key) {
            Some(v) => encode(v, tol, fold, &mut buf),
            None => buf.push('~'),
        }
    }

    Fingerprint(blake3::hash(buf.as_bytes()).to_hex().to_string())
}

fn encode(value: &Value, tol: f64, fold: bool, buf: &mut String) {
    match value {
        Value::Null => buf.push('~'),
        Value::Bool(b) => buf.push(if *b { 'T' } else { 'F' }),
        Value::Number(n) => encode_number(n, tol, fold, buf),
        Value::String(s) => {
            buf.push('"');
            buf.push_str(s.trim());
            buf.push('"');
        }
        Value::Array(items) => {
            buf.push('[');
            for item in items {
                encode(item, tol, fold, buf);
                buf.push(',');
            }
            buf.push(']');
        }
        Value::Object(map) => {
            // serde_json maps iterate in key order.
            buf.push('{');
            for (k, v) in map {
                buf.push_str(k);
                buf.push(':');
                encode(v, tol, fold, buf);
                buf.push(',');
            }
            buf.push('}');
        }
    }
}

fn valid_tolerance(tol: f64) -> bool {
    tol.is_finite() && tol > 0.0 && tol <= 0.5
}

/// Integers are written exactly. Floats within half a step of an integer
/// are written as that integer, so `30` and `30.0` agree; other floats
/// become a count of `tol` steps, or their shortest round-trip text when the
/// count does not fit in an `i64`.
fn encode_number(n: &serde_json::Number, tol: f64, fold: bool, buf: &mut String) {
    if fold {
        let x = n.as_f64().unwrap_or(f64::NAN);
        match fold_steps(x, tol) {
            Some(steps) => buf.push_str(&format!("s{steps}")),
            None => buf.push_str(&format!("f{x:?}")),
        }
        return;
    }
    if let Some(i) = n.as_i64() {
        buf.push_str(&i.to_string());
        return;
    }
    if let Some(u) = n.as_u64() {
        buf.push_str(&u.to_string());
        return;
    }

    let x = n.as_f64().unwrap_or(f64::NAN);
    let whole = x.round();
    if (x - whole).abs() <= tol / 2.0 && whole.abs() < MAX_EXACT_INT {
        buf.push_str(&(whole as i64).to_string());
        return;
    }
    match snap_steps(x, tol) {
        Some(steps) => buf.push_str(&format!("s{steps}")),
        None => buf.push_str(&format!("f{x:?}")),
    }
}

/// 2^53: every integer below it is exact in an `f64`.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Number of `tol` steps nearest to `x`, if it fits in an `i64`.
fn snap_steps(x: f64, tol: f64) -> Option<i64> {
    let steps = (x / tol).round();
    // i64::MAX as f64 is 2^63, itself out of range.
    (steps.is_finite() && steps >= i64::MIN as f64 && steps < i64::MAX as f64)
        .then_some(steps as i64)
}

/// Steps of `x` folded into `[0, 1)`; a value snapping to 1 becomes 0.
fn fold_steps(x: f64, tol: f64) -> Option<i64> {
    if !x.is_finite() {
        return None;
    }
    let period = snap_steps(1.0, tol).filter(|p| *p > 0)?;
    let steps = snap_steps(x.rem_euclid(1.0), tol)?;
    Some(steps.rem_euclid(period))
}

/// Fingerprint -> registered task, scoped to one construction pass.
///
/// `T` is whatever handle the caller uses for tasks (a `TaskId` once
/// registered in a flow, a sibling `Producer` inside a `Work` builder).
#[derive(Debug, Clone)]
pub struct DedupIndex<T> {
    seen: HashMap<Fingerprint, T>,
    hits: usize,
}

impl<T> Default for DedupIndex<T> {
    fn default() -> Self {
        Self {
            seen: HashMap::new(),
            hits: 0,
        }
    }
}

impl<T: Clone + Eq + Hash + fmt::Debug> DedupIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the task known for `fingerprint`, or create it with
    /// `make_task` and remember it. A failing `make_task` leaves the index
    /// untouched.
    pub fn get_or_register<F>(&mut self, fingerprint: Fingerprint, make_task: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(existing) = self.seen.get(&fingerprint) {
            self.hits += 1;
            debug!(%fingerprint, task = ?existing, "duplicate request; reusing task");
            return Ok(existing.clone());
        }

        let task = make_task()?;
        self.seen.insert(fingerprint, task.clone());
        Ok(task)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&T> {
        self.seen.get(fingerprint)
    }

    /// Number of distinct tasks registered through this index.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Number of requests answered with an existing task.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FlowError;
    use serde_json::json;

    fn vars(v: Value) -> Vars {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn ignores_bookkeeping_fields_and_formatting() {
        let rules = CanonicalRules::new(["ecut", "smearing"]);
        let a = vars(json!({"ecut": 30.0, "smearing": "gaussian", "comment": "first"}));
        let b = vars(json!({"smearing": " gaussian ", "ecut": 30, "comment": "second"}));
        assert_eq!(
            canonicalize(TaskKind::Scf, &a, &rules),
            canonicalize(TaskKind::Scf, &b, &rules)
        );
    }

    #[test]
    fn kind_participates() {
        let rules = CanonicalRules::qpoint();
        let q = vars(json!({"qpt": [0.5, 0.0, 0.0]}));
        assert_ne!(
            canonicalize(TaskKind::Phonon, &q, &rules),
            canonicalize(TaskKind::Eph, &q, &rules)
        );
    }

    #[test]
    fn reduced_coordinates_fold_lattice_translations() {
        let rules = CanonicalRules::qpoint();
        let fp = |q: Value| canonicalize(TaskKind::Eph, &vars(json!({ "qpt": q })), &rules);

        assert_eq!(fp(json!([0.5, 0.0, 0.0])), fp(json!([-0.5, 0.0, 0.0])));
        assert_eq!(fp(json!([1.0, 0.0, 0.0])), fp(json!([0.0, 0.0, 0.0])));
        assert_eq!(fp(json!([0.25, 0.0, 0.0])), fp(json!([0.25000000000001, -0.0, 0.0])));
        assert_eq!(fp(json!([0.0, 0.0, 0.0])), fp(json!([0.999999999999, 0.0, 0.0])));
        assert_ne!(fp(json!([0.25, 0.0, 0.0])), fp(json!([0.0, 0.25, 0.0])));
    }

    #[test]
    fn unfolded_floats_keep_sign() {
        let rules = CanonicalRules::new(["strain"]);
        let a = vars(json!({"strain": 0.01}));
        let b = vars(json!({"strain": -0.01}));
        assert_ne!(
            canonicalize(TaskKind::Elastic, &a, &rules),
            canonicalize(TaskKind::Elastic, &b, &rules)
        );
    }

    #[test]
    fn index_reuses_first_task() {
        let rules = CanonicalRules::qpoint();
        let mut index: DedupIndex<usize> = DedupIndex::new();
        let mut created = 0;

        for q in [json!([0.5, 0.0, 0.0]), json!([0.0, 0.0, 0.0]), json!([-0.5, 0.0, 0.0])] {
            let fp = canonicalize(TaskKind::Eph, &vars(json!({ "qpt": q })), &rules);
            index
                .get_or_register(fp, || {
                    created += 1;
                    Ok(created)
                })
                .unwrap();
        }

        assert_eq!(created, 2);
        assert_eq!(index.len(), 2);
        assert_eq!(index.hits(), 1);
    }

    #[test]
    fn failed_creation_is_not_remembered() {
        let rules = CanonicalRules::qpoint();
        let fp = canonicalize(TaskKind::Eph, &vars(json!({"qpt": [0, 0, 0]})), &rules);
        let mut index: DedupIndex<usize> = DedupIndex::new();

        let err = index.get_or_register(fp.clone(), || Err(FlowError::config("nope")));
        assert!(err.is_err());
        assert!(index.get(&fp).is_none());
        assert_eq!(index.get_or_register(fp, || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn large_values_stay_distinct() {
        let rules = CanonicalRules::new(["seed"]);
        let fp = |v: Value| canonicalize(TaskKind::Generic, &vars(json!({ "seed": v })), &rules);

        assert_ne!(fp(json!(100_000_000_000u64)), fp(json!(900_000_000_000u64)));
        assert_ne!(fp(json!(1e11)), fp(json!(9e11)));
        assert_ne!(fp(json!(1.5e30)), fp(json!(2.5e30)));
        // Above 2^53, adjacent integers are still told apart.
        assert_ne!(fp(json!(9_007_199_254_740_993u64)), fp(json!(9_007_199_254_740_992u64)));
        assert_ne!(fp(json!(u64::MAX)), fp(json!(u64::MAX - 1)));
        // Integer-valued floats match their integer spelling.
        assert_eq!(fp(json!(1e11)), fp(json!(100_000_000_000u64)));
        assert_eq!(fp(json!(-0.0)), fp(json!(0)));
    }

    #[test]
    fn tolerance_outside_range_is_rejected() {
        for tol in [3.0, 0.0, -1e-3, f64::NAN, f64::INFINITY] {
            let err = CanonicalRules::qpoint().with_tolerance(tol).unwrap_err();
            assert!(err.is_configuration(), "{tol}");
        }
        let coarse = CanonicalRules::qpoint().with_tolerance(0.5).unwrap();
        let q = vars(json!({"qpt": [0.5, 0.0, 0.0]}));
        canonicalize(TaskKind::Eph, &q, &coarse);
    }

    #[test]
    fn unusable_tolerance_set_directly_falls_back_to_default() {
        let q = vars(json!({"qpt": [0.5, 0.0, 0.0]}));
        let expected = canonicalize(TaskKind::Eph, &q, &CanonicalRules::qpoint());
        for tol in [3.0, 0.0, f64::NAN] {
            let mut rules = CanonicalRules::qpoint();
            rules.tolerance = tol;
            assert_eq!(canonicalize(TaskKind::Eph, &q, &rules), expected);
        }
    }
}
