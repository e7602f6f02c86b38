// src/pipelines/elastic.rs

//! Elastic constants (and optionally piezoelectric tensor and Born effective
//! charges) in a single work.

use serde_json::json;

use crate::dag::{Artifact, Deps, Producer, Vars};
use crate::flow::{Finisher, Work};
use crate::pipelines::{with_vars, PerturbationInputs, StrainPerturbation};

/// Default convergence threshold of the NSCF run used when density deps are
/// given.
const NSCF_TOLWFR: f64 = 1.0e-20;

/// Per-stage convergence criteria. `None` keeps the default of the stage
/// (for DDK, DDE and strain, whatever the [`PerturbationInputs`] picks).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElasticTolerances {
    /// `tolwfr` of the NSCF run.
    pub nscf_tolwfr: Option<f64>,
    pub ddk: Option<Vars>,
    pub dde: Option<Vars>,
    /// Applied to strain perturbations and relaxed-ion phonons.
    pub strain: Option<Vars>,
}

#[derive(Debug, Clone)]
pub struct ElasticOptions {
    /// Add Γ phonons for the relaxed-ion tensor.
    pub with_relaxed_ion: bool,
    /// Strain and phonon tasks also read DDK.
    pub with_piezo: bool,
    /// Add electric-field perturbations.
    pub with_dde: bool,
    /// Density to start from. When set, the WFK comes from an NSCF run
    /// depending on it instead of an SCF run.
    pub den_deps: Option<Deps>,
    pub tolerances: ElasticTolerances,
}

impl Default for ElasticOptions {
    fn default() -> Self {
        Self {
            with_relaxed_ion: true,
            with_piezo: false,
            with_dde: false,
            den_deps: None,
            tolerances: ElasticTolerances::default(),
        }
    }
}

/// Builder for the elastic work. The structure is assumed to be relaxed.
pub struct ElasticWork;

impl ElasticWork {
    /// Lay out the work: one WFK task, DDK/DDE tasks as requested, Γ phonons
    /// and strain perturbations. The work merges every member `DDB`.
    pub fn from_scf_input(
        scf: &Vars,
        options: &ElasticOptions,
        inputs: &dyn PerturbationInputs,
    ) -> Work {
        let mut work = Work::new()
            .with_label("elastic")
            .with_finisher(Finisher::merge([Artifact::DDB]));

        let tolerances = &options.tolerances;
        let wfk = match &options.den_deps {
            None => work.register_scf_task(scf.clone()),
            Some(deps) => {
                let tolwfr = tolerances.nscf_tolwfr.unwrap_or(NSCF_TOLWFR);
                let nscf = with_vars(scf, [("iscf", json!(-2)), ("tolwfr", json!(tolwfr))]);
                work.register_nscf_task(nscf, deps.clone())
            }
        };
        let wfk_deps = Deps::new().on(wfk, Artifact::WFK);

        let mut ddk_deps = Deps::new();
        if options.with_piezo || options.with_dde {
            let ddk_tasks: Vec<Producer> = inputs
                .ddk_inputs(scf, tolerances.ddk.as_ref())
                .into_iter()
                .map(|vars| work.register_ddk_task(vars, wfk_deps.clone()))
                .collect();
            for task in ddk_tasks {
                ddk_deps = ddk_deps.on(task, Artifact::DDK);
            }
        }

        if options.with_dde {
            let dde_deps = wfk_deps.clone().merge(ddk_deps.clone());
            for vars in inputs.dde_inputs(scf, tolerances.dde.as_ref()) {
                work.register_dde_task(vars, dde_deps.clone());
            }
        }

        let perturbation_deps = if options.with_piezo {
            wfk_deps.merge(ddk_deps)
        } else {
            wfk_deps
        };

        let perturbations = inputs.strain_inputs(scf, options.with_relaxed_ion, tolerances.strain.as_ref());
        for pert in &perturbations {
            if let StrainPerturbation::Phonon(vars) = pert {
                work.register_phonon_task(vars.clone(), perturbation_deps.clone());
            }
        }
        for pert in perturbations {
            if let StrainPerturbation::Strain(vars) = pert {
                work.register_elastic_task(vars, perturbation_deps.clone());
            }
        }

        work
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::pipelines::Unreduced;
    use crate::types::{TaskKind, TaskStatus};

    fn kinds(work: &Work) -> Vec<TaskKind> {
        work.tasks().iter().map(|t| t.spec.kind).collect()
    }

    #[test]
    fn default_layout_is_scf_phonons_and_strains() {
        let work = ElasticWork::from_scf_input(&Vars::new(), &ElasticOptions::default(), &Unreduced);
        let kinds = kinds(&work);
        assert_eq!(kinds[0], TaskKind::Scf);
        assert_eq!(kinds.iter().filter(|k| **k == TaskKind::Phonon).count(), 3);
        assert_eq!(kinds.iter().filter(|k| **k == TaskKind::Elastic).count(), 6);
        assert!(!kinds.contains(&TaskKind::Ddk));
    }

    #[test]
    fn piezo_and_dde_read_ddk() {
        let options = ElasticOptions {
            with_piezo: true,
            with_dde: true,
            ..ElasticOptions::default()
        };
        let work = ElasticWork::from_scf_input(&Vars::new(), &options, &Unreduced);
        let dde = work
            .tasks()
            .iter()
            .find(|t| t.spec.kind == TaskKind::Dde)
            .unwrap();
        // WFK plus three DDK.
        assert_eq!(dde.deps.len(), 4);
        let strain = work.tasks().last().unwrap();
        assert_eq!(strain.spec.kind, TaskKind::Elastic);
        assert_eq!(strain.deps.len(), 4);
    }

    #[test]
    fn nscf_start_depends_on_external_density() {
        let mut flow = Flow::new("/tmp/elastic");
        let scf = flow.register_scf_task(Vars::new()).unwrap();
        let options = ElasticOptions {
            den_deps: Some(Deps::new().on(scf, Artifact::DEN)),
            ..ElasticOptions::default()
        };
        let work = ElasticWork::from_scf_input(&Vars::new(), &options, &Unreduced);
        let w = flow.register_work(work).unwrap();

        let first = flow.works()[w.0].tasks()[0];
        assert_eq!(flow.task(first).unwrap().kind(), TaskKind::Nscf);
        assert_eq!(flow.task(first).unwrap().status(), TaskStatus::Init);
        assert_eq!(flow.next_runnable(), vec![scf]);
    }

    #[test]
    fn stage_tolerances_reach_their_tasks() {
        let tolwfr = |v: f64| Vars::from([("tolwfr".to_string(), json!(v))]);
        let options = ElasticOptions {
            with_piezo: true,
            den_deps: Some(Deps::new().on(crate::types::TaskId(0), Artifact::DEN)),
            tolerances: ElasticTolerances {
                nscf_tolwfr: Some(1e-18),
                ddk: Some(tolwfr(1e-22)),
                dde: None,
                strain: Some(Vars::from([("tolvrs".to_string(), json!(1e-10))])),
            },
            ..ElasticOptions::default()
        };
        let work = ElasticWork::from_scf_input(&Vars::new(), &options, &Unreduced);

        let value = |kind: TaskKind, key: &str| {
            work.tasks()
                .iter()
                .find(|t| t.spec.kind == kind)
                .and_then(|t| t.spec.vars.get(key).cloned())
        };
        assert_eq!(value(TaskKind::Nscf, "tolwfr"), Some(json!(1e-18)));
        assert_eq!(value(TaskKind::Ddk, "tolwfr"), Some(json!(1e-22)));
        assert_eq!(value(TaskKind::Elastic, "tolvrs"), Some(json!(1e-10)));
        assert_eq!(value(TaskKind::Phonon, "tolvrs"), Some(json!(1e-10)));
    }
}
