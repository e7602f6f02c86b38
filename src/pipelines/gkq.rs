// src/pipelines/gkq.rs

//! Electron-phonon matrix elements along a list of q-points.
//!
//! Layout:
//! 1. ground-state SCF work;
//! 2. phonons on the `ngqpt` mesh, merged into `DDB` and `DVDB`;
//! 3. WFQ + phonons for each q-point of the path, merged likewise;
//! 4. one EPH task per distinct path q-point reading the mesh `DDB` and the
//!    path `DVDB`;
//! 5. optionally, the same EPH tasks with Fourier-interpolated potentials
//!    reading `DDB` and `DVDB` of the mesh work only.

use serde_json::json;
use tracing::info;

use crate::dag::{Artifact, Deps, JobSpec, Vars};
use crate::errors::{FlowError, Result};
use crate::flow::{canonicalize, CanonicalRules, DedupIndex, Finisher, Flow, MergeRule, Work};
use crate::pipelines::{with_vars, PerturbationInputs};
use crate::types::{TaskId, TaskKind, WorkId};

/// Wavefunction convergence for the WFQ runs.
const WFQ_TOLWFR: f64 = 1.0e-22;

#[derive(Debug, Clone)]
pub struct GkqPathOptions {
    /// Divisions of the q-mesh along each reciprocal vector.
    pub ngqpt: [u32; 3],
    /// Also compute electric-field response and Born effective charges.
    pub with_becs: bool,
    /// Add the work with interpolated potentials.
    pub test_ft_interpolation: bool,
}

impl Default for GkqPathOptions {
    fn default() -> Self {
        Self {
            ngqpt: [2, 2, 2],
            with_becs: false,
            test_ft_interpolation: true,
        }
    }
}

/// Handles to the pieces of a q-path EPH flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GkqPathFlow {
    pub scf_task: TaskId,
    pub qmesh_work: WorkId,
    pub qpath_work: WorkId,
    pub eph_work: WorkId,
    pub interp_work: Option<WorkId>,
}

impl GkqPathFlow {
    pub fn from_scf_input(
        flow: &mut Flow,
        scf: &Vars,
        qpath: &[[f64; 3]],
        options: &GkqPathOptions,
        inputs: &dyn PerturbationInputs,
    ) -> Result<Self> {
        if qpath.is_empty() {
            return Err(FlowError::config("q-path must contain at least one q-point"));
        }

        let scf_task = flow.register_scf_task(scf.clone())?;

        let qmesh = qmesh_points(options.ngqpt)?;
        let qmesh_work =
            flow.register_work(phonon_work("qmesh", scf, scf_task, &qmesh, options.with_becs, inputs))?;

        let (path_work, firsts) = path_work(scf, scf_task, qpath, inputs);
        let qpath_work = flow.register_work(path_work)?;

        // One representative phonon task per distinct path q-point; EPH
        // tasks read the same inputs it does. The index is keyed by the
        // folded q-point.
        let mut seen: DedupIndex<usize> = DedupIndex::new();
        let mut distinct: Vec<([f64; 3], Deps)> = Vec::new();
        for (qpt, pos) in firsts {
            let phonon = flow.work(qpath_work)?.tasks()[pos];
            let deps = Deps::from(flow.task(phonon)?.deps().to_vec());
            let fingerprint = canonicalize(
                TaskKind::Eph,
                &with_vars(&Vars::new(), [("qpt", json!(qpt))]),
                &CanonicalRules::qpoint(),
            );
            seen.get_or_register(fingerprint, || {
                distinct.push((qpt, deps));
                Ok(distinct.len() - 1)
            })?;
        }

        let eph_work = flow.new_work("eph", Finisher::Noop);
        for (qpt, deps) in &distinct {
            let vars = make_eph_input(scf, options.ngqpt, *qpt);
            let task = flow.register_task(eph_work, JobSpec::new(TaskKind::Eph, vars), deps.clone())?;
            flow.add_deps(
                task,
                Deps::new()
                    .on(qmesh_work, Artifact::DDB)
                    .on(qpath_work, Artifact::DVDB),
            )?;
        }

        let interp_work = if options.test_ft_interpolation {
            let work = flow.new_work("eph_interp", Finisher::Noop);
            for (qpt, deps) in &distinct {
                let mut vars = make_eph_input(scf, options.ngqpt, *qpt);
                vars.insert("eph_use_ftinterp".into(), json!(1));
                let task =
                    flow.register_task(work, JobSpec::new(TaskKind::Eph, vars), deps.clone())?;
                flow.add_deps(
                    task,
                    Deps::new().on_all(qmesh_work, [Artifact::DDB, Artifact::DVDB]),
                )?;
            }
            Some(work)
        } else {
            None
        };

        info!(
            qmesh = qmesh.len(),
            qpath = qpath.len(),
            distinct = distinct.len(),
            "gkq path flow registered"
        );

        Ok(Self {
            scf_task,
            qmesh_work,
            qpath_work,
            eph_work,
            interp_work,
        })
    }
}

fn merge_ddb_dvdb() -> Finisher {
    Finisher::Merge(vec![
        MergeRule::same(Artifact::DDB),
        MergeRule::into_target(Artifact::POT, Artifact::DVDB),
    ])
}

/// Phonons at every `qpts` entry on top of the SCF wavefunctions.
fn phonon_work(
    label: &str,
    scf: &Vars,
    scf_task: TaskId,
    qpts: &[[f64; 3]],
    with_becs: bool,
    inputs: &dyn PerturbationInputs,
) -> Work {
    let mut work = Work::new().with_label(label).with_finisher(merge_ddb_dvdb());
    let wfk = Deps::new().on(scf_task, Artifact::WFK);

    if with_becs {
        let mut ddk_deps = Deps::new();
        for vars in inputs.ddk_inputs(scf, None) {
            let ddk = work.register_ddk_task(vars, wfk.clone());
            ddk_deps = ddk_deps.on(ddk, Artifact::DDK);
        }
        let dde_deps = wfk.clone().merge(ddk_deps);
        for vars in inputs.dde_inputs(scf, None) {
            work.register_dde_task(vars, dde_deps.clone());
        }
    }

    for qpt in qpts {
        for vars in inputs.phonon_inputs(scf, *qpt) {
            work.register_phonon_task(vars, wfk.clone());
        }
    }
    work
}

/// WFQ and phonon tasks for each path point. Also returns, per path point,
/// the position of its first phonon task in the work. Γ needs no WFQ.
fn path_work(
    scf: &Vars,
    scf_task: TaskId,
    qpath: &[[f64; 3]],
    inputs: &dyn PerturbationInputs,
) -> (Work, Vec<([f64; 3], usize)>) {
    let mut work = Work::new().with_label("qpath").with_finisher(merge_ddb_dvdb());
    let base = Deps::new().on(scf_task, Artifact::WFK);
    let mut firsts = Vec::with_capacity(qpath.len());

    for qpt in qpath {
        let deps = if is_gamma(qpt) {
            base.clone()
        } else {
            let nscf = with_vars(
                scf,
                [
                    ("iscf", json!(-2)),
                    ("qpt", json!(qpt)),
                    ("tolwfr", json!(WFQ_TOLWFR)),
                    ("outputs", json!([Artifact::WFQ])),
                ],
            );
            let wfq = work.register_task(
                JobSpec::new(TaskKind::Nscf, nscf),
                Deps::new().on(scf_task, Artifact::DEN),
            );
            base.clone().on(wfq, Artifact::WFQ)
        };

        let first = work.len();
        for vars in inputs.phonon_inputs(scf, *qpt) {
            work.register_phonon_task(vars, deps.clone());
        }
        if work.len() > first {
            firsts.push((*qpt, first));
        }
    }

    (work, firsts)
}

fn is_gamma(qpt: &[f64; 3]) -> bool {
    qpt.iter().all(|x| x.abs() < 1e-8)
}

/// Unshifted Γ-centred mesh in reduced coordinates.
pub fn qmesh_points(ngqpt: [u32; 3]) -> Result<Vec<[f64; 3]>> {
    if ngqpt.contains(&0) {
        return Err(FlowError::config(format!(
            "q-mesh divisions must be positive, got {ngqpt:?}"
        )));
    }
    let [n1, n2, n3] = ngqpt;
    let mut points = Vec::with_capacity((n1 * n2 * n3) as usize);
    for i in 0..n1 {
        for j in 0..n2 {
            for k in 0..n3 {
                points.push([
                    f64::from(i) / f64::from(n1),
                    f64::from(j) / f64::from(n2),
                    f64::from(k) / f64::from(n3),
                ]);
            }
        }
    }
    Ok(points)
}

/// EPH parameters for `qpt` derived from the ground-state set.
pub fn make_eph_input(scf: &Vars, ngqpt: [u32; 3], qpt: [f64; 3]) -> Vars {
    with_vars(
        scf,
        [
            ("optdriver", json!(7)),
            ("eph_task", json!(-2)),
            ("nqpt", json!(1)),
            ("qpt", json!(qpt)),
            ("ddb_ngqpt", json!(ngqpt)),
            ("prtphdos", json!(0)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Producer;
    use crate::pipelines::Unreduced;

    #[test]
    fn mesh_points_are_reduced_and_complete() {
        let points = qmesh_points([2, 1, 1]).unwrap();
        assert_eq!(points, vec![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]]);
        assert!(qmesh_points([0, 1, 1]).is_err());
    }

    #[test]
    fn equivalent_path_points_share_one_eph_task() {
        let mut flow = Flow::new("/tmp/gkq");
        let qpath = [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [-0.5, 0.0, 0.0], [0.25, 0.0, 0.0]];
        let options = GkqPathOptions {
            ngqpt: [2, 1, 1],
            ..GkqPathOptions::default()
        };
        let gkq =
            GkqPathFlow::from_scf_input(&mut flow, &Vars::new(), &qpath, &options, &Unreduced)
                .unwrap();

        // 0.5 and -0.5 differ by a lattice vector.
        let eph = flow.work(gkq.eph_work).unwrap();
        assert_eq!(eph.tasks().len(), 3);

        let first_eph = flow.task(eph.tasks()[1]).unwrap();
        let producers: Vec<Producer> = first_eph.deps().iter().map(|e| e.producer).collect();
        assert!(producers.contains(&Producer::Work(gkq.qmesh_work)));
        assert!(producers.contains(&Producer::Work(gkq.qpath_work)));
        assert!(first_eph
            .deps()
            .iter()
            .any(|e| e.artifact == Artifact::from(Artifact::WFQ)));

        let interp = gkq.interp_work.unwrap();
        assert_eq!(flow.work(interp).unwrap().tasks().len(), 3);
        assert!(flow.validate().is_ok());
        assert_eq!(flow.next_runnable(), vec![gkq.scf_task]);
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut flow = Flow::new("/tmp/gkq");
        let err = GkqPathFlow::from_scf_input(
            &mut flow,
            &Vars::new(),
            &[],
            &GkqPathOptions::default(),
            &Unreduced,
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(flow.len_works(), 0);
    }
}
