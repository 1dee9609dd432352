//! Stage drivers. Each stage reads what the previous one persisted in the
//! case directory and writes its own outputs there, so stages can run as
//! separate invocations.

use crate::case::config::{CaseCadence, ControlDict, PodDict, CONTROL_DICT_FILE, POD_DICT_FILE};
use crate::case::csv::{self, PodInfo};
use crate::case::store::{CaseDir, SnapshotStore, TimeDir, TimeSelection};
use crate::error::{PodError, PodResult};
use crate::pod::basis::{extract_basis, modes_for_energy, EnergyRow};
use crate::pod::galerkin::assemble;
use crate::pod::projection::{project_snapshot, project_snapshots};
use crate::pod::reconstruct::reconstruct_field;
use crate::pod::rom::{integrate, RomSettings};
use crate::solver::{CellVolumes, FvOperators, VectorField};
use crate::trace::Tracer;
use std::fmt;

pub const VELOCITY: &str = "U";
pub const MEAN_VELOCITY: &str = "UMean";
pub const ROM_VELOCITY: &str = "Urom";

pub fn mode_field_name(k: usize) -> String {
    format!("sigma_{k}")
}

fn snapshot_times<S: SnapshotStore + ?Sized>(
    store: &S,
    selection: &TimeSelection,
) -> PodResult<Vec<TimeDir>> {
    // Directories holding only reconstructed fields are not snapshots
    let times: Vec<TimeDir> = selection
        .apply(&store.list_times()?)
        .into_iter()
        .filter(|t| store.has_field(VELOCITY, t))
        .collect();
    if times.is_empty() {
        return Err(PodError::NoSnapshots);
    }
    log::info!(
        "Selected {} time directories ({} .. {})",
        times.len(),
        times[0].name,
        times[times.len() - 1].name
    );
    Ok(times)
}

fn last_time(times: &[TimeDir]) -> PodResult<&TimeDir> {
    times.last().ok_or(PodError::NoSnapshots)
}

fn load_modes<S: SnapshotStore + ?Sized>(
    store: &S,
    time: &TimeDir,
    n: usize,
) -> PodResult<Vec<VectorField>> {
    (0..n)
        .map(|k| store.load(&mode_field_name(k), time))
        .collect()
}

fn load_snapshots<S: SnapshotStore + ?Sized>(
    store: &S,
    times: &[TimeDir],
) -> PodResult<Vec<VectorField>> {
    log::info!("Reading fields {}", VELOCITY);
    times.iter().map(|t| store.load(VELOCITY, t)).collect()
}

fn load_pod_dict(case: &CaseDir) -> PodResult<PodDict> {
    PodDict::load(&case.constant_file(POD_DICT_FILE))
}

fn case_cadence(case: &CaseDir, times: &[TimeDir]) -> PodResult<CaseCadence> {
    let path = case.system_file(CONTROL_DICT_FILE);
    if path.is_file() {
        Ok(CaseCadence::from_control_dict(&ControlDict::load(&path)?))
    } else {
        log::warn!(
            "{} not found; deriving case cadence from {} snapshot times",
            path.display(),
            times.len()
        );
        CaseCadence::from_times(times)
    }
}

#[derive(Debug, Clone)]
pub struct BasisReport {
    pub n_snapshots: usize,
    pub n_modes: usize,
    pub written_to: String,
    pub energy: Vec<EnergyRow>,
}

/// Extracts `n_basis` modes (`0` = all) from the selected `U` snapshots
/// around `UMean` of the last selected time, writes them as `sigma_<k>` into
/// that time directory and the energy table to `podEnergy.csv`.
pub fn run_basis(
    case: &CaseDir,
    n_basis: usize,
    selection: &TimeSelection,
    tracer: &mut Tracer,
) -> PodResult<BasisReport> {
    let times = snapshot_times(case, selection)?;
    let n_dim = times.len();
    if n_basis > n_dim {
        return Err(PodError::BasisCountExceedsSnapshots {
            requested: n_basis,
            available: n_dim,
        });
    }
    let last = last_time(&times)?;

    let (weights, mean, snapshots) = tracer.stage("basis.read", || {
        let weights = CellVolumes::new(case.cell_volumes()?);
        let mean = case.load(MEAN_VELOCITY, last)?;
        let snapshots = load_snapshots(case, &times)?;
        Ok((weights, mean, snapshots))
    })?;

    let basis = tracer.stage("basis.extract", || {
        extract_basis(&snapshots, &mean, &weights, n_basis)
    })?;

    tracer.stage("basis.write", || {
        log::info!("Saving pod basis in {}", last.name);
        for (k, mode) in basis.modes.iter().enumerate() {
            case.save(&mode_field_name(k), last, mode)?;
        }
        csv::write_energy(&case.file(csv::POD_ENERGY_CSV), &basis.energy)
    })?;

    Ok(BasisReport {
        n_snapshots: n_dim,
        n_modes: basis.n_modes(),
        written_to: last.name.clone(),
        energy: basis.energy,
    })
}

#[derive(Debug, Clone)]
pub struct PrecomputeReport {
    pub info: PodInfo,
    pub initial: Vec<f64>,
}

/// Assembles the Galerkin system for the first `nDim` modes and projects the
/// first selected snapshot to get the initial coefficients.
pub fn run_precompute(
    case: &CaseDir,
    selection: &TimeSelection,
    tracer: &mut Tracer,
) -> PodResult<PrecomputeReport> {
    let dict = load_pod_dict(case)?;
    let times = snapshot_times(case, selection)?;
    if dict.n_dim > times.len() {
        return Err(PodError::BasisCountExceedsSnapshots {
            requested: dict.n_dim,
            available: times.len(),
        });
    }
    let first = &times[0];
    let last = last_time(&times)?;
    let cadence = case_cadence(case, &times)?.restrict(first.value, last.value);

    let mesh = case.mesh()?;
    let ops = FvOperators::new(&mesh)?;

    let (u0, mean, modes) = tracer.stage("precompute.read", || {
        let u0 = case.load(VELOCITY, first)?;
        let mean = case.load(MEAN_VELOCITY, last)?;
        let modes = load_modes(case, last, dict.n_dim)?;
        Ok((u0, mean, modes))
    })?;

    let system = tracer.stage("precompute.galerkin", || {
        assemble(&modes, &mean, dict.nu_total(), &ops)
    })?;
    let initial = project_snapshot(&modes, &mean, &u0, &ops)?;

    let info = PodInfo {
        n_dim: dict.n_dim,
        nu: dict.nu,
        write_freq: dict.write_freq,
        t_end: dict.t_end,
        dt: dict.dt,
        n_cells: mesh.num_cells(),
        case_time_span: cadence.time_span,
        num_output_dirs: cadence.num_output_dirs,
        start_time: cadence.start_time,
    };

    tracer.stage("precompute.write", || {
        csv::write_pod_info(&case.file(csv::POD_INFO_CSV), &info)?;
        csv::write_values(&case.file(csv::PREV_VALS_CSV), &initial)?;
        csv::write_galerkin(case.root(), &system)
    })?;

    Ok(PrecomputeReport {
        info,
        initial: initial.iter().copied().collect(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RomReport {
    pub dim: usize,
    pub n_steps: usize,
    pub write_steps: usize,
    pub rows_written: usize,
}

/// Integrates the persisted Galerkin system and writes `avals.csv`.
pub fn run_rom(
    case: &CaseDir,
    dim_override: Option<usize>,
    tracer: &mut Tracer,
) -> PodResult<RomReport> {
    log::info!("Reading output from precompute");
    let info = csv::read_pod_info(&case.file(csv::POD_INFO_CSV))?;
    if let Some(dim) = dim_override {
        if dim == 0 {
            return Err(PodError::InvalidConfig(
                "reduced dimension must be at least 1".into(),
            ));
        }
        if dim > info.n_dim {
            return Err(PodError::DimensionExceedsTensors {
                requested: dim,
                available: info.n_dim,
            });
        }
    }
    let system = csv::read_galerkin(case.root(), info.n_dim)?;
    let prev_path = case.file(csv::PREV_VALS_CSV);
    let initial = csv::read_values(&prev_path)?;
    if initial.len() != info.n_dim {
        return Err(PodError::format(
            &prev_path,
            initial.len(),
            format!("expected {} values, found {}", info.n_dim, initial.len()),
        ));
    }

    let settings = RomSettings {
        dt: info.dt,
        t_end: info.t_end,
        start_time: info.start_time,
        case_time_span: info.case_time_span,
        write_freq: info.write_freq,
        num_output_dirs: info.num_output_dirs,
        dim_override,
    };

    let trajectory = tracer.stage("rom.integrate", || integrate(&system, &initial, &settings))?;
    let rows_written = tracer.stage("rom.write", || {
        csv::write_coefficient_rows(&case.file(csv::AVALS_CSV), trajectory.emitted())
    })?;

    Ok(RomReport {
        dim: dim_override.unwrap_or(info.n_dim),
        n_steps: trajectory.n_steps(),
        write_steps: trajectory.write_steps,
        rows_written,
    })
}

/// Writes `Urom` for every row of `avals.csv` into the time directory of the
/// row's time. Basis and mean come from the last selected time.
pub fn run_reconstruct(
    case: &CaseDir,
    selection: &TimeSelection,
    tracer: &mut Tracer,
) -> PodResult<Vec<TimeDir>> {
    let rows = csv::read_coefficient_rows(&case.file(csv::AVALS_CSV))?;
    let times = snapshot_times(case, selection)?;
    let last = last_time(&times)?;
    let dim = rows.first().map_or(0, |(_, a)| a.len());

    let (mean, modes) = tracer.stage("reconstruct.read", || {
        Ok((case.load(MEAN_VELOCITY, last)?, load_modes(case, last, dim)?))
    })?;

    tracer.stage("reconstruct.write", || {
        let mut written = Vec::with_capacity(rows.len());
        for (t, a) in &rows {
            let field = reconstruct_field(&mean, &modes, a)?;
            let dir = case.time_dir_for(*t)?;
            log::info!("t = {}", dir.name);
            case.save(ROM_VELOCITY, &dir, &field)?;
            written.push(dir);
        }
        Ok(written)
    })
}

/// Projects every selected `U` snapshot onto the leading `n_modes` modes
/// (default `nDim` from podDict) and writes `aPOD.csv`.
pub fn run_project(
    case: &CaseDir,
    n_modes: Option<usize>,
    selection: &TimeSelection,
    tracer: &mut Tracer,
) -> PodResult<usize> {
    let n = match n_modes {
        Some(n) if n > 0 => n,
        _ => load_pod_dict(case)?.n_dim,
    };
    let times = snapshot_times(case, selection)?;
    let last = last_time(&times)?;

    let (weights, mean, modes, snapshots) = tracer.stage("project.read", || {
        let weights = CellVolumes::new(case.cell_volumes()?);
        let mean = case.load(MEAN_VELOCITY, last)?;
        let modes = load_modes(case, last, n)?;
        let snapshots = load_snapshots(case, &times)?;
        Ok((weights, mean, modes, snapshots))
    })?;

    let coefficients = tracer.stage("project.coefficients", || {
        project_snapshots(&modes, &mean, &snapshots, &weights)
    })?;

    tracer.stage("project.write", || {
        csv::write_coefficient_rows(
            &case.file(csv::APOD_CSV),
            times.iter().map(|t| t.value).zip(coefficients.iter()),
        )
    })
}

/// What `info` prints about a case.
#[derive(Debug, Clone)]
pub struct CaseSummary {
    pub root: String,
    pub n_cells: Option<usize>,
    pub total_volume: Option<f64>,
    pub times: Vec<TimeDir>,
    pub last_fields: Vec<String>,
    pub pod_dict: Option<PodDict>,
    pub energy: Option<Vec<EnergyRow>>,
}

pub fn case_summary(case: &CaseDir, selection: &TimeSelection) -> PodResult<CaseSummary> {
    let mesh = case.mesh().ok();
    let times = selection.apply(&case.list_times()?);
    let last_fields = match times.last() {
        Some(t) => case.fields_at(t)?,
        None => Vec::new(),
    };
    let dict_path = case.constant_file(POD_DICT_FILE);
    let pod_dict = if dict_path.is_file() {
        Some(PodDict::load(&dict_path)?)
    } else {
        None
    };
    let energy_path = case.file(csv::POD_ENERGY_CSV);
    let energy = if energy_path.is_file() {
        Some(csv::read_energy(&energy_path)?)
    } else {
        None
    };

    Ok(CaseSummary {
        root: case.root().display().to_string(),
        n_cells: mesh.as_ref().map(|m| m.num_cells()),
        total_volume: mesh.as_ref().map(|m| m.total_volume()),
        times,
        last_fields,
        pod_dict,
        energy,
    })
}

impl fmt::Display for CaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Case: {}", self.root)?;
        match (self.n_cells, self.total_volume) {
            (Some(n), Some(v)) => writeln!(f, "  mesh: cells={} volume={:.6}", n, v)?,
            _ => writeln!(f, "  mesh: <missing or invalid>")?,
        }
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => writeln!(
                f,
                "  times: {} ({} .. {})",
                self.times.len(),
                first.name,
                last.name
            )?,
            _ => writeln!(f, "  times: none")?,
        }
        if !self.last_fields.is_empty() {
            writeln!(f, "  fields at last time: {}", self.last_fields.join(" "))?;
        }
        if let Some(dict) = &self.pod_dict {
            writeln!(
                f,
                "  podDict: nDim={} nu={} artificial_nu={} writeFreq={} tEnd={} dt={}",
                dict.n_dim, dict.nu, dict.artificial_nu, dict.write_freq, dict.t_end, dict.dt
            )?;
        }
        if let Some(energy) = &self.energy {
            writeln!(f, "  energy:")?;
            writeln!(f, "    {:>5} {:>12} {:>12} {:>14}", "mode", "indiv %", "cumul %", "eigenvalue")?;
            for row in energy {
                writeln!(
                    f,
                    "    {:>5} {:>12.4} {:>12.4} {:>14.6e}",
                    row.mode, row.individual, row.cumulative, row.eigenvalue
                )?;
            }
            for pct in [90.0, 99.0] {
                match modes_for_energy(energy, pct) {
                    Some(n) => writeln!(f, "  modes for {pct}% energy: {n}")?,
                    None => writeln!(f, "  modes for {pct}% energy: not reached")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::synthetic::{write_synthetic_case, SyntheticCase};

    fn synthetic() -> (tempfile::TempDir, CaseDir) {
        let dir = tempfile::tempdir().unwrap();
        let case = write_synthetic_case(dir.path(), &SyntheticCase::default()).unwrap();
        (dir, case)
    }

    #[test]
    fn basis_rejects_too_many_modes_before_reading() {
        let (_dir, case) = synthetic();
        let n = case.list_times().unwrap().len();
        let err = run_basis(&case, n + 1, &TimeSelection::all(), &mut Tracer::disabled())
            .unwrap_err();
        assert!(matches!(err, PodError::BasisCountExceedsSnapshots { .. }));
    }

    #[test]
    fn basis_writes_modes_into_last_time() {
        let (_dir, case) = synthetic();
        let report = run_basis(&case, 3, &TimeSelection::all(), &mut Tracer::disabled()).unwrap();
        let last = case.list_times().unwrap().pop().unwrap();

        assert_eq!(report.n_modes, 3);
        assert_eq!(report.written_to, last.name);
        for k in 0..3 {
            assert!(case.has_field(&mode_field_name(k), &last));
        }
        assert!(!case.has_field(&mode_field_name(3), &last));
        assert_eq!(report.energy.len(), report.n_snapshots);
        assert!(case.file(csv::POD_ENERGY_CSV).is_file());
    }

    #[test]
    fn precompute_needs_basis() {
        let (_dir, case) = synthetic();
        let err = run_precompute(&case, &TimeSelection::all(), &mut Tracer::disabled())
            .unwrap_err();
        assert!(matches!(err, PodError::MissingField { .. }));
    }

    #[test]
    fn rom_rejects_override_beyond_tensors() {
        let (_dir, case) = synthetic();
        let mut tracer = Tracer::disabled();
        run_basis(&case, 0, &TimeSelection::all(), &mut tracer).unwrap();
        let pre = run_precompute(&case, &TimeSelection::all(), &mut tracer).unwrap();

        let err = run_rom(&case, Some(pre.info.n_dim + 1), &mut tracer).unwrap_err();
        assert!(matches!(err, PodError::DimensionExceedsTensors { .. }));
        assert!(!case.file(csv::AVALS_CSV).exists());
    }

    #[test]
    fn summary_reports_energy_thresholds() {
        let (_dir, case) = synthetic();
        run_basis(&case, 0, &TimeSelection::all(), &mut Tracer::disabled()).unwrap();
        let summary = case_summary(&case, &TimeSelection::all()).unwrap();
        let text = summary.to_string();

        assert!(summary.energy.is_some());
        assert!(text.contains("modes for 90% energy"));
        assert!(text.contains("podDict: nDim="));
    }
}
