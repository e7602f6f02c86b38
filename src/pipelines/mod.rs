// src/pipelines/mod.rs

//! Composite builders for common multi-stage calculations, written on top of
//! the public [`Flow`](crate::flow::Flow) / [`Work`](crate::flow::Work) API.
//!
//! Which perturbations a calculation needs depends on the structure and its
//! symmetry, which the engine knows nothing about. Builders therefore ask a
//! [`PerturbationInputs`] collaborator for the parameter sets and only wire
//! up the graph.

pub mod elastic;
pub mod gkq;

use serde_json::{json, Value};

use crate::dag::Vars;

pub use elastic::{ElasticOptions, ElasticTolerances, ElasticWork};
pub use gkq::{make_eph_input, qmesh_points, GkqPathFlow, GkqPathOptions};

/// One response-function calculation requested for an elastic work.
#[derive(Debug, Clone, PartialEq)]
pub enum StrainPerturbation {
    /// Atomic displacement at Γ (relaxed-ion contribution).
    Phonon(Vars),
    /// Uniaxial or shear strain.
    Strain(Vars),
}

/// Source of per-perturbation parameter sets derived from a ground-state
/// parameter set.
///
/// `tolerance`, when given, is a convergence criterion such as
/// `{"tolwfr": 1e-20}` to set on every produced entry in place of the
/// implementation's default.
pub trait PerturbationInputs {
    /// One entry per k-direction derivative.
    fn ddk_inputs(&self, scf: &Vars, tolerance: Option<&Vars>) -> Vec<Vars>;

    /// One entry per electric-field direction.
    fn dde_inputs(&self, scf: &Vars, tolerance: Option<&Vars>) -> Vec<Vars>;

    /// Strain perturbations, plus Γ phonons when `with_phonons` is set.
    fn strain_inputs(
        &self,
        scf: &Vars,
        with_phonons: bool,
        tolerance: Option<&Vars>,
    ) -> Vec<StrainPerturbation>;

    /// Atomic-displacement perturbations at `qpt` (reduced coordinates).
    fn phonon_inputs(&self, scf: &Vars, qpt: [f64; 3]) -> Vec<Vars>;
}

/// Every Cartesian direction of every perturbation, no symmetry reduction.
///
/// Reads `natom` (default 1) from the ground-state parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unreduced;

const DIRECTIONS: [[u8; 3]; 3] = [[1, 0, 0], [0, 1, 0], [0, 0, 1]];

impl Unreduced {
    fn natom(scf: &Vars) -> u64 {
        scf.get("natom").and_then(Value::as_u64).unwrap_or(1).max(1)
    }

    fn with_tolerance(vars: Vars, tolerance: Option<&Vars>) -> Vars {
        match tolerance {
            Some(tol) => with_vars(&vars, tol.iter().map(|(k, v)| (k.as_str(), v.clone()))),
            None => vars,
        }
    }
}

impl PerturbationInputs for Unreduced {
    fn ddk_inputs(&self, scf: &Vars, tolerance: Option<&Vars>) -> Vec<Vars> {
        DIRECTIONS
            .iter()
            .map(|dir| with_vars(scf, [("rfelfd", json!(2)), ("rfdir", json!(dir))]))
            .map(|vars| Self::with_tolerance(vars, tolerance))
            .collect()
    }

    fn dde_inputs(&self, scf: &Vars, tolerance: Option<&Vars>) -> Vec<Vars> {
        DIRECTIONS
            .iter()
            .map(|dir| with_vars(scf, [("rfelfd", json!(3)), ("rfdir", json!(dir))]))
            .map(|vars| Self::with_tolerance(vars, tolerance))
            .collect()
    }

    fn strain_inputs(
        &self,
        scf: &Vars,
        with_phonons: bool,
        tolerance: Option<&Vars>,
    ) -> Vec<StrainPerturbation> {
        let mut out = Vec::new();
        if with_phonons {
            out.extend(
                self.phonon_inputs(scf, [0.0; 3])
                    .into_iter()
                    .map(|vars| StrainPerturbation::Phonon(Self::with_tolerance(vars, tolerance))),
            );
        }
        // rfstrs = 1: uniaxial, 2: shear.
        for rfstrs in [1, 2] {
            for dir in DIRECTIONS {
                let vars = with_vars(scf, [("rfstrs", json!(rfstrs)), ("rfdir", json!(dir))]);
                out.push(StrainPerturbation::Strain(Self::with_tolerance(vars, tolerance)));
            }
        }
        out
    }

    fn phonon_inputs(&self, scf: &Vars, qpt: [f64; 3]) -> Vec<Vars> {
        let natom = Self::natom(scf);
        let mut out = Vec::new();
        for atom in 1..=natom {
            for dir in DIRECTIONS {
                out.push(with_vars(
                    scf,
                    [
                        ("rfphon", json!(1)),
                        ("rfatpol", json!([atom, atom])),
                        ("rfdir", json!(dir)),
                        ("qpt", json!(qpt)),
                    ],
                ));
            }
        }
        out
    }
}

/// Copy of `base` with `extra` set on top.
pub fn with_vars<'a, I>(base: &Vars, extra: I) -> Vars
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    let mut vars = base.clone();
    for (key, value) in extra {
        vars.insert(key.to_string(), value);
    }
    vars
}

/// Reduced coordinates stored under `qpt`, if present and well formed.
pub fn qpt_of(vars: &Vars) -> Option<[f64; 3]> {
    let items = vars.get("qpt")?.as_array()?;
    match items.as_slice() {
        [x, y, z] => Some([x.as_f64()?, y.as_f64()?, z.as_f64()?]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreduced_counts_follow_natom() {
        let scf = with_vars(&Vars::new(), [("natom", json!(2))]);
        assert_eq!(Unreduced.ddk_inputs(&scf, None).len(), 3);
        assert_eq!(Unreduced.phonon_inputs(&scf, [0.5, 0.0, 0.0]).len(), 6);

        let perts = Unreduced.strain_inputs(&scf, true, None);
        let phonons = perts
            .iter()
            .filter(|p| matches!(p, StrainPerturbation::Phonon(_)))
            .count();
        assert_eq!((phonons, perts.len()), (6, 12));
    }

    #[test]
    fn tolerance_is_set_on_every_entry() {
        let tol = with_vars(&Vars::new(), [("tolvrs", json!(1e-10))]);
        let perts = Unreduced.strain_inputs(&Vars::new(), true, Some(&tol));
        assert!(perts.iter().all(|p| match p {
            StrainPerturbation::Phonon(v) | StrainPerturbation::Strain(v) =>
                v.get("tolvrs") == Some(&json!(1e-10)),
        }));
        assert!(Unreduced
            .ddk_inputs(&Vars::new(), None)
            .iter()
            .all(|v| !v.contains_key("tolvrs")));
    }

    #[test]
    fn qpt_is_read_back() {
        let vars = with_vars(&Vars::new(), [("qpt", json!([0.5, 0.0, 0.25]))]);
        assert_eq!(qpt_of(&vars), Some([0.5, 0.0, 0.25]));
        assert_eq!(qpt_of(&Vars::new()), None);
    }
}
