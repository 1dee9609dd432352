use crate::case::config::{ControlDict, PodDict, CONTROL_DICT_FILE, POD_DICT_FILE};
use crate::case::pipeline::{MEAN_VELOCITY, VELOCITY};
use crate::case::store::{CaseDir, SnapshotStore, TimeDir};
use crate::error::{PodError, PodResult};
use crate::solver::mesh::{generate_structured_rect_mesh, BoundarySides, Mesh};
use crate::solver::VectorField;
use nalgebra::Vector2;
use std::f64::consts::PI;
use std::path::Path;

/// Channel flow with decaying travelling waves on a parabolic profile.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticCase {
    pub nx: usize,
    pub ny: usize,
    pub length: f64,
    pub height: f64,
    pub u_max: f64,
    pub amplitude: f64,
    pub decay: f64,
    pub omega: f64,
    pub n_snapshots: usize,
    pub start_time: f64,
    pub write_interval: f64,
    /// Write `system/controlDict.json`; without it the cadence is derived
    /// from the snapshot times.
    pub control_dict: bool,
    pub pod_dict: PodDict,
}

impl Default for SyntheticCase {
    fn default() -> Self {
        Self {
            nx: 24,
            ny: 8,
            length: 3.0,
            height: 1.0,
            u_max: 1.0,
            amplitude: 0.1,
            decay: 0.5,
            omega: 2.0,
            n_snapshots: 9,
            start_time: 0.0,
            write_interval: 0.1,
            control_dict: true,
            pod_dict: PodDict {
                n_dim: 4,
                nu: 0.01,
                artificial_nu: 0.0,
                write_freq: 0,
                t_end: 0.0,
                dt: 0.001,
            },
        }
    }
}

impl SyntheticCase {
    pub fn validate(&self) -> PodResult<()> {
        if self.nx == 0 || self.ny == 0 {
            return Err(PodError::InvalidConfig("mesh needs at least one cell".into()));
        }
        if self.length <= 0.0 || self.height <= 0.0 {
            return Err(PodError::InvalidConfig("domain size must be positive".into()));
        }
        if self.n_snapshots == 0 {
            return Err(PodError::NoSnapshots);
        }
        if !self.write_interval.is_finite() || self.write_interval <= 0.0 {
            return Err(PodError::InvalidConfig(
                "snapshot interval must be positive".into(),
            ));
        }
        self.pod_dict.validate()
    }

    pub fn time(&self, i: usize) -> f64 {
        self.start_time + i as f64 * self.write_interval
    }

    pub fn velocity(&self, x: f64, y: f64, t: f64) -> Vector2<f64> {
        let h = self.height;
        let base = self.u_max * 4.0 * y * (h - y) / (h * h);
        let s1 = (PI * y / h).sin();
        let s2 = (2.0 * PI * y / h).sin();
        let phase = 2.0 * PI * x / self.length - self.omega * t;
        let amp = self.amplitude * (-self.decay * t).exp();
        Vector2::new(
            base + amp * (s1 * phase.cos() + 0.5 * s2 * (2.0 * phase).cos()),
            amp * (0.5 * s2 * phase.sin() + 0.25 * s1 * (3.0 * phase).sin()),
        )
    }

    pub fn snapshot(&self, mesh: &Mesh, t: f64) -> VectorField {
        VectorField::from_fn(mesh.num_cells(), |c| {
            self.velocity(mesh.cell_cx[c], mesh.cell_cy[c], t)
        })
    }
}

/// Writes mesh, snapshots `U`, their sample mean `UMean` (in the last time
/// directory) and the dictionaries.
pub fn write_synthetic_case(root: &Path, spec: &SyntheticCase) -> PodResult<CaseDir> {
    spec.validate()?;
    let case = CaseDir::create(root)?;

    let mesh = generate_structured_rect_mesh(
        spec.nx,
        spec.ny,
        spec.length,
        spec.height,
        BoundarySides::channel(),
    );
    case.write_mesh(&mesh)?;
    log::info!(
        "Synthetic channel: {} cells, {} snapshots",
        mesh.num_cells(),
        spec.n_snapshots
    );

    let mut mean = VectorField::zeros(mesh.num_cells());
    let mut last = TimeDir::new(spec.start_time);
    for i in 0..spec.n_snapshots {
        let time = TimeDir::new(spec.time(i));
        let u = spec.snapshot(&mesh, time.value);
        mean.axpy(1.0 / spec.n_snapshots as f64, &u);
        case.save(VELOCITY, &time, &u)?;
        last = time;
    }
    case.save(MEAN_VELOCITY, &last, &mean)?;

    spec.pod_dict.save(&case.constant_file(POD_DICT_FILE))?;
    if spec.control_dict {
        // Ten solver steps per written snapshot
        let control = ControlDict {
            start_time: spec.start_time,
            end_time: spec.time(spec.n_snapshots - 1),
            delta_t: spec.write_interval / 10.0,
            write_interval: 10.0,
        };
        control.save(&case.system_file(CONTROL_DICT_FILE))?;
    }

    Ok(case)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_complete_case() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticCase::default();
        let case = write_synthetic_case(dir.path(), &spec).unwrap();

        let times = case.list_times().unwrap();
        assert_eq!(times.len(), spec.n_snapshots);
        assert_eq!(times[1].name, "0.1");
        let last = times.last().unwrap();
        assert!(case.has_field(MEAN_VELOCITY, last));
        assert!(!case.has_field(MEAN_VELOCITY, &times[0]));
        assert!(case.constant_file(POD_DICT_FILE).is_file());
        assert!(case.system_file(CONTROL_DICT_FILE).is_file());
        assert_eq!(case.mesh().unwrap().num_cells(), spec.nx * spec.ny);
    }

    #[test]
    fn mean_is_sample_mean() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticCase {
            n_snapshots: 4,
            ..SyntheticCase::default()
        };
        let case = write_synthetic_case(dir.path(), &spec).unwrap();
        let times = case.list_times().unwrap();

        let mut sum = VectorField::zeros(spec.nx * spec.ny);
        for t in &times {
            sum.axpy(0.25, &case.load(VELOCITY, t).unwrap());
        }
        let mean = case.load(MEAN_VELOCITY, times.last().unwrap()).unwrap();
        assert!(sum.max_abs_diff(&mean) < 1e-12);
    }

    #[test]
    fn velocity_vanishes_on_walls() {
        let spec = SyntheticCase::default();
        for x in [0.0, 0.7, 2.9] {
            let v = spec.velocity(x, 0.0, 0.3);
            assert!(v.norm() < 1e-12);
            let v = spec.velocity(x, spec.height, 0.3);
            assert!(v.norm() < 1e-12);
        }
    }

    #[test]
    fn rejects_empty_case() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SyntheticCase {
            n_snapshots: 0,
            ..SyntheticCase::default()
        };
        assert!(matches!(
            write_synthetic_case(dir.path(), &spec),
            Err(PodError::NoSnapshots)
        ));
    }
}
