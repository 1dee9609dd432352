use crate::error::{PodError, PodResult};
use crate::pod::galerkin::GalerkinSystem;
use nalgebra::DVector;

/// Relative slack when turning the integration window into a step count, so
/// that `(1.0 - 0.0) / 0.1` does not round up to 11 steps.
const STEP_COUNT_TOLERANCE: f64 = 1e-9;

/// Largest integration window accepted, in steps. Every step keeps its
/// coefficient vector in memory.
pub const MAX_STEP_COUNT: usize = 100_000_000;

/// How often (in steps) progress is logged at `info` level.
const PROGRESS_INTERVAL: usize = 1000;

/// Integration window and output cadence of one ROM run.
#[derive(Debug, Clone, PartialEq)]
pub struct RomSettings {
    pub dt: f64,
    /// End time; `0` falls back to `start_time + case_time_span`.
    pub t_end: f64,
    pub start_time: f64,
    pub case_time_span: f64,
    /// Emit every `write_freq` steps; `0` derives the cadence from
    /// `num_output_dirs`.
    pub write_freq: usize,
    pub num_output_dirs: usize,
    /// Restrict the reduced system to its leading modes.
    pub dim_override: Option<usize>,
}

impl RomSettings {
    pub fn validate(&self) -> PodResult<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(PodError::InvalidConfig(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        if !self.t_end.is_finite() || !self.start_time.is_finite() {
            return Err(PodError::InvalidConfig(
                "start and end times must be finite".to_string(),
            ));
        }
        let end = self.end_time();
        if end < self.start_time {
            return Err(PodError::InvalidConfig(format!(
                "end time {} precedes start time {}",
                end, self.start_time
            )));
        }
        let steps = (end - self.start_time) / self.dt;
        if !steps.is_finite() || steps > MAX_STEP_COUNT as f64 {
            return Err(PodError::InvalidConfig(format!(
                "{} .. {} with dt = {} needs {:e} steps, more than the {} allowed",
                self.start_time, end, self.dt, steps, MAX_STEP_COUNT
            )));
        }
        Ok(())
    }

    pub fn end_time(&self) -> f64 {
        if self.t_end == 0.0 {
            self.start_time + self.case_time_span
        } else {
            self.t_end
        }
    }

    /// `ceil((tEnd - start) / dt)`
    pub fn step_count(&self) -> usize {
        let span = (self.end_time() - self.start_time).max(0.0);
        let steps = span / self.dt;
        (steps - STEP_COUNT_TOLERANCE * steps.max(1.0)).ceil().max(0.0) as usize
    }

    /// Steps between emitted rows, never less than one.
    pub fn write_steps(&self, n_steps: usize) -> usize {
        if self.write_freq > 0 {
            return self.write_freq;
        }
        let dirs = self.num_output_dirs.max(1);
        let derived = (n_steps as f64 / dirs as f64).round() as usize;
        if derived == 0 {
            log::warn!(
                "{} steps over {} output directories gives no write cadence; emitting every step",
                n_steps,
                dirs
            );
        }
        derived.max(1)
    }
}

/// Coefficient history of one ROM run. Row `i` holds the state at
/// `start_time + i*dt`; row 0 is the initial vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RomTrajectory {
    pub start_time: f64,
    pub dt: f64,
    pub coefficients: Vec<DVector<f64>>,
    pub write_steps: usize,
}

impl RomTrajectory {
    pub fn n_steps(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn time(&self, row: usize) -> f64 {
        self.start_time + row as f64 * self.dt
    }

    pub fn last(&self) -> Option<&DVector<f64>> {
        self.coefficients.last()
    }

    /// Rows at multiples of `write_steps`, as `(time, coefficients)`.
    pub fn emitted(&self) -> impl Iterator<Item = (f64, &DVector<f64>)> + '_ {
        self.coefficients
            .iter()
            .enumerate()
            .step_by(self.write_steps)
            .map(move |(i, a)| (self.time(i), a))
    }
}

/// One explicit Euler step. `da` for every mode is evaluated from the same
/// `prev` before any component is updated.
pub fn euler_step(system: &GalerkinSystem, prev: &DVector<f64>, dt: f64) -> DVector<f64> {
    let da = system.rhs(prev);
    prev + da * dt
}

/// Advances `initial` through the reduced system with forward Euler.
pub fn integrate(
    system: &GalerkinSystem,
    initial: &DVector<f64>,
    settings: &RomSettings,
) -> PodResult<RomTrajectory> {
    settings.validate()?;

    if !system.is_consistent() {
        return Err(PodError::InvalidConfig(
            "Galerkin tensors have inconsistent dimensions".to_string(),
        ));
    }
    if initial.len() != system.dim() {
        return Err(PodError::InvalidConfig(format!(
            "initial coefficient vector has {} entries, tensors have dimension {}",
            initial.len(),
            system.dim()
        )));
    }

    let (system, initial) = match settings.dim_override {
        Some(dim) if dim != system.dim() => {
            log::info!("Restricting ROM to the leading {} of {} modes", dim, system.dim());
            (system.truncate(dim)?, initial.rows(0, dim).into_owned())
        }
        _ => (system.clone(), initial.clone()),
    };

    if initial.iter().any(|v| !v.is_finite()) {
        return Err(PodError::NonFiniteCoefficients {
            step: 0,
            time: settings.start_time,
        });
    }

    let n_steps = settings.step_count();
    let write_steps = settings.write_steps(n_steps);
    log::info!(
        "Integrating {} modes for {} steps (dt = {}, t = {} .. {}), writing every {} steps",
        system.dim(),
        n_steps,
        settings.dt,
        settings.start_time,
        settings.end_time(),
        write_steps
    );

    let mut coefficients = Vec::with_capacity(n_steps + 1);
    coefficients.push(initial);
    for step in 1..=n_steps {
        let next = euler_step(&system, &coefficients[step - 1], settings.dt);
        if next.iter().any(|v| !v.is_finite()) {
            return Err(PodError::NonFiniteCoefficients {
                step,
                time: settings.start_time + step as f64 * settings.dt,
            });
        }
        coefficients.push(next);

        if step % PROGRESS_INTERVAL == 0 {
            log::info!("t = {}", settings.start_time + step as f64 * settings.dt);
        }
    }

    Ok(RomTrajectory {
        start_time: settings.start_time,
        dt: settings.dt,
        coefficients,
        write_steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::galerkin::QuadraticTensor;
    use nalgebra::DMatrix;

    fn settings(dt: f64, t_end: f64) -> RomSettings {
        RomSettings {
            dt,
            t_end,
            start_time: 0.0,
            case_time_span: 1.0,
            write_freq: 0,
            num_output_dirs: 10,
            dim_override: None,
        }
    }

    fn decay(rate: f64) -> GalerkinSystem {
        GalerkinSystem {
            constant: DVector::zeros(1),
            linear: DMatrix::from_element(1, 1, -rate),
            quadratic: QuadraticTensor::zeros(1),
        }
    }

    fn coupled() -> GalerkinSystem {
        let mut quadratic = QuadraticTensor::zeros(2);
        quadratic.set(0, 1, 1, -0.3);
        quadratic.set(1, 0, 1, 0.2);
        GalerkinSystem {
            constant: DVector::from_vec(vec![0.1, -0.05]),
            linear: DMatrix::from_row_slice(2, 2, &[-0.5, 1.0, -1.0, -0.5]),
            quadratic,
        }
    }

    #[test]
    fn step_count_rounds_up_partial_steps() {
        assert_eq!(settings(0.1, 1.0).step_count(), 10);
        assert_eq!(settings(0.3, 1.0).step_count(), 4);
        assert_eq!(settings(0.5, 0.0).step_count(), 2);
    }

    #[test]
    fn zero_end_time_uses_case_span() {
        let mut s = settings(0.1, 0.0);
        s.start_time = 2.0;
        s.case_time_span = 0.5;
        assert_eq!(s.end_time(), 2.5);
        assert_eq!(s.step_count(), 5);
    }

    #[test]
    fn write_steps_derivation() {
        let mut s = settings(0.1, 1.0);
        assert_eq!(s.write_steps(100), 10);
        // Fewer steps than output directories would round to zero
        assert_eq!(s.write_steps(3), 1);
        s.num_output_dirs = 0;
        assert_eq!(s.write_steps(7), 7);
        s.write_freq = 4;
        assert_eq!(s.write_steps(100), 4);
    }

    #[test]
    fn linear_decay_follows_euler_recurrence() {
        let rate = 2.0;
        let dt = 0.01;
        let traj = integrate(&decay(rate), &DVector::from_element(1, 1.0), &settings(dt, 1.0))
            .unwrap();

        assert_eq!(traj.n_steps(), 100);
        for (i, a) in traj.coefficients.iter().enumerate() {
            let expected = (1.0 - rate * dt).powi(i as i32);
            assert!((a[0] - expected).abs() < 1e-12);
        }
        let last = traj.last().unwrap()[0];
        assert!((last - (-rate).exp()).abs() < 0.01);
    }

    #[test]
    fn integration_is_deterministic() {
        let a0 = DVector::from_vec(vec![0.4, -0.2]);
        let s = settings(0.01, 2.0);
        let first = integrate(&coupled(), &a0, &s).unwrap();
        let second = integrate(&coupled(), &a0, &s).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn update_uses_previous_state_only() {
        // Pure rotation: a sequential in-place sweep would use the new a_0
        // when computing a_1.
        let system = GalerkinSystem {
            constant: DVector::zeros(2),
            linear: DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0]),
            quadratic: QuadraticTensor::zeros(2),
        };
        let next = euler_step(&system, &DVector::from_vec(vec![1.0, 1.0]), 0.5);
        assert_eq!(next[0], 1.5);
        assert_eq!(next[1], 0.5);
    }

    #[test]
    fn emitted_rows_follow_write_cadence() {
        let mut s = settings(0.1, 1.0);
        s.write_freq = 3;
        let traj = integrate(&decay(1.0), &DVector::from_element(1, 1.0), &s).unwrap();

        let times: Vec<f64> = traj.emitted().map(|(t, _)| t).collect();
        assert_eq!(times.len(), 4);
        for (t, want) in times.iter().zip([0.0, 0.3, 0.6, 0.9]) {
            assert!((t - want).abs() < 1e-12);
        }
    }

    #[test]
    fn dimension_override_truncates() {
        let mut s = settings(0.01, 0.5);
        s.dim_override = Some(1);
        let traj = integrate(&coupled(), &DVector::from_vec(vec![0.4, -0.2]), &s).unwrap();
        assert!(traj.coefficients.iter().all(|a| a.len() == 1));

        s.dim_override = Some(3);
        let err = integrate(&coupled(), &DVector::from_vec(vec![0.4, -0.2]), &s).unwrap_err();
        assert!(matches!(
            err,
            PodError::DimensionExceedsTensors {
                requested: 3,
                available: 2
            }
        ));
    }

    #[test]
    fn explicit_euler_stability_boundary() {
        // Forward Euler on da/dt = -k a is stable only for dt < 2/k. The
        // integrator does not guard against finite growth.
        let rate = 10.0;
        let a0 = DVector::from_element(1, 1.0);

        let stable = integrate(&decay(rate), &a0, &settings(0.15, 3.0)).unwrap();
        assert!(stable.last().unwrap()[0].abs() < 1.0);

        let unstable = integrate(&decay(rate), &a0, &settings(0.25, 10.0)).unwrap();
        assert!(unstable.last().unwrap()[0].abs() > 1e3);
    }

    #[test]
    fn blow_up_reports_non_finite_step() {
        // da/dt = a^2 reaches infinity in finite time
        let mut quadratic = QuadraticTensor::zeros(1);
        quadratic.set(0, 0, 0, 1.0);
        let system = GalerkinSystem {
            constant: DVector::zeros(1),
            linear: DMatrix::zeros(1, 1),
            quadratic,
        };
        let err = integrate(&system, &DVector::from_element(1, 10.0), &settings(1.0, 100.0))
            .unwrap_err();
        assert!(matches!(err, PodError::NonFiniteCoefficients { step, .. } if step > 1));
    }

    #[test]
    fn rejects_bad_settings() {
        let a0 = DVector::from_element(1, 1.0);
        assert!(matches!(
            integrate(&decay(1.0), &a0, &settings(0.0, 1.0)),
            Err(PodError::InvalidConfig(_))
        ));
        let mut s = settings(0.1, 1.0);
        s.start_time = 5.0;
        assert!(matches!(
            integrate(&decay(1.0), &a0, &s),
            Err(PodError::InvalidConfig(_))
        ));
        assert!(matches!(
            integrate(&decay(1.0), &DVector::zeros(2), &settings(0.1, 1.0)),
            Err(PodError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_windows_with_too_many_steps() {
        let a0 = DVector::from_element(1, 1.0);
        for dt in [1e-300, f64::MIN_POSITIVE, 1e-9] {
            let s = settings(dt, 1.0);
            assert!(matches!(s.validate(), Err(PodError::InvalidConfig(_))), "dt = {dt}");
            assert!(matches!(
                integrate(&decay(1.0), &a0, &s),
                Err(PodError::InvalidConfig(_))
            ));
        }
        settings(1e-6, 1.0).validate().unwrap();
    }

    #[test]
    fn empty_window_keeps_initial_state() {
        let mut s = settings(0.1, 0.0);
        s.case_time_span = 0.0;
        let traj = integrate(&decay(1.0), &DVector::from_element(1, 0.7), &s).unwrap();
        assert_eq!(traj.n_steps(), 0);
        assert_eq!(traj.coefficients[0][0], 0.7);
        assert_eq!(traj.emitted().count(), 1);
    }
}
