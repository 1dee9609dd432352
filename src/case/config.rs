use crate::case::store::{read_json, write_json, TimeDir};
use crate::error::{PodError, PodResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const POD_DICT_FILE: &str = "podDict.json";
pub const CONTROL_DICT_FILE: &str = "controlDict.json";

/// Reduced-order model settings, read from `constant/podDict.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDict {
    /// Number of modes used by the Galerkin system and the ROM.
    #[serde(rename = "nDim")]
    pub n_dim: usize,
    /// Molecular kinematic viscosity.
    pub nu: f64,
    /// Closure viscosity added to `nu` in the Galerkin system.
    #[serde(default)]
    pub artificial_nu: f64,
    #[serde(rename = "writeFreq", default)]
    pub write_freq: usize,
    /// ROM end time; `0` integrates over the snapshot time span.
    #[serde(rename = "tEnd", default)]
    pub t_end: f64,
    pub dt: f64,
}

impl PodDict {
    pub fn load(path: &Path) -> PodResult<Self> {
        let dict: PodDict = read_json(path)?;
        dict.validate()?;
        Ok(dict)
    }

    pub fn save(&self, path: &Path) -> PodResult<()> {
        write_json(path, self)
    }

    pub fn validate(&self) -> PodResult<()> {
        if self.n_dim == 0 {
            return Err(PodError::InvalidConfig("nDim must be at least 1".into()));
        }
        if !(self.nu.is_finite() && self.nu >= 0.0) {
            return Err(PodError::InvalidConfig(format!(
                "nu must be a non-negative number, got {}",
                self.nu
            )));
        }
        if !self.artificial_nu.is_finite() {
            return Err(PodError::InvalidConfig(format!(
                "artificial_nu must be finite, got {}",
                self.artificial_nu
            )));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(PodError::InvalidConfig(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if !(self.t_end.is_finite() && self.t_end >= 0.0) {
            return Err(PodError::InvalidConfig(format!(
                "tEnd must be zero or positive, got {}",
                self.t_end
            )));
        }
        Ok(())
    }

    /// Viscosity used in the Galerkin system.
    pub fn nu_total(&self) -> f64 {
        self.nu + self.artificial_nu
    }
}

/// Cadence of the full-order run, read from `system/controlDict.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDict {
    pub start_time: f64,
    pub end_time: f64,
    pub delta_t: f64,
    pub write_interval: f64,
}

impl ControlDict {
    pub fn load(path: &Path) -> PodResult<Self> {
        let dict: ControlDict = read_json(path)?;
        dict.validate()?;
        Ok(dict)
    }

    pub fn save(&self, path: &Path) -> PodResult<()> {
        write_json(path, self)
    }

    pub fn validate(&self) -> PodResult<()> {
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            return Err(PodError::InvalidConfig(format!(
                "deltaT must be positive, got {}",
                self.delta_t
            )));
        }
        if !(self.write_interval.is_finite() && self.write_interval > 0.0) {
            return Err(PodError::InvalidConfig(format!(
                "writeInterval must be positive, got {}",
                self.write_interval
            )));
        }
        if !(self.start_time.is_finite() && self.end_time.is_finite())
            || self.end_time < self.start_time
        {
            return Err(PodError::InvalidConfig(format!(
                "endTime {} precedes startTime {}",
                self.end_time, self.start_time
            )));
        }
        Ok(())
    }
}

/// Time span and output cadence of the source run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaseCadence {
    pub time_span: f64,
    pub num_output_dirs: usize,
    pub start_time: f64,
}

impl CaseCadence {
    /// `(endTime - startTime) / deltaT / writeInterval` output directories.
    pub fn from_control_dict(dict: &ControlDict) -> Self {
        let span = dict.end_time - dict.start_time;
        let dirs = span / dict.delta_t / dict.write_interval;
        Self {
            time_span: span,
            num_output_dirs: dirs.round().max(1.0) as usize,
            start_time: dict.start_time,
        }
    }

    /// Derived from the selected snapshot times when no control dictionary
    /// is present.
    pub fn from_times(times: &[TimeDir]) -> PodResult<Self> {
        let (first, last) = match (times.first(), times.last()) {
            (Some(first), Some(last)) => (first.value, last.value),
            _ => return Err(PodError::NoSnapshots),
        };
        Ok(Self {
            time_span: last - first,
            num_output_dirs: times.len().saturating_sub(1).max(1),
            start_time: first,
        })
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.time_span
    }

    /// Re-anchors the cadence on the selected window `[first, last]`. The
    /// span never runs past the last selected snapshot, and the output
    /// interval of the source run is kept.
    pub fn restrict(&self, first: f64, last: f64) -> Self {
        let interval = self.time_span / self.num_output_dirs.max(1) as f64;
        let end = self.end_time().min(last);
        let span = (end - first).max(0.0);
        let dirs = if interval > 0.0 {
            (span / interval).round().max(1.0) as usize
        } else {
            1
        };
        Self {
            time_span: span,
            num_output_dirs: dirs,
            start_time: first,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_dict_uses_case_file_keys_and_defaults() {
        let dict: PodDict = serde_json::from_str(r#"{"nDim": 4, "nu": 0.01, "dt": 0.001}"#).unwrap();
        assert_eq!(dict.n_dim, 4);
        assert_eq!(dict.artificial_nu, 0.0);
        assert_eq!(dict.write_freq, 0);
        assert_eq!(dict.t_end, 0.0);
        dict.validate().unwrap();

        let full: PodDict = serde_json::from_str(
            r#"{"nDim": 2, "nu": 0.01, "artificial_nu": 0.005, "writeFreq": 10, "tEnd": 2.5, "dt": 0.01}"#,
        )
        .unwrap();
        assert!((full.nu_total() - 0.015).abs() < 1e-15);
        assert_eq!(full.write_freq, 10);
    }

    #[test]
    fn pod_dict_validation() {
        let ok = PodDict {
            n_dim: 2,
            nu: 0.01,
            artificial_nu: 0.0,
            write_freq: 0,
            t_end: 0.0,
            dt: 0.01,
        };
        ok.validate().unwrap();

        for bad in [
            PodDict { n_dim: 0, ..ok.clone() },
            PodDict { dt: 0.0, ..ok.clone() },
            PodDict { nu: -1.0, ..ok.clone() },
            PodDict { t_end: f64::NAN, ..ok.clone() },
        ] {
            assert!(matches!(bad.validate(), Err(PodError::InvalidConfig(_))));
        }
    }

    #[test]
    fn missing_required_key_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POD_DICT_FILE);
        std::fs::write(&path, r#"{"nDim": 2, "dt": 0.1}"#).unwrap();
        assert!(matches!(PodDict::load(&path), Err(PodError::Json { .. })));
    }

    #[test]
    fn cadence_from_control_dict() {
        let dict: ControlDict = serde_json::from_str(
            r#"{"startTime": 0, "endTime": 2, "deltaT": 0.001, "writeInterval": 100}"#,
        )
        .unwrap();
        let cadence = CaseCadence::from_control_dict(&dict);
        assert_eq!(cadence.time_span, 2.0);
        assert_eq!(cadence.num_output_dirs, 20);
        assert_eq!(cadence.start_time, 0.0);
    }

    #[test]
    fn cadence_from_snapshot_times() {
        let times: Vec<TimeDir> = [0.5, 1.0, 1.5].iter().map(|&t| TimeDir::new(t)).collect();
        let cadence = CaseCadence::from_times(&times).unwrap();
        assert_eq!(cadence.time_span, 1.0);
        assert_eq!(cadence.num_output_dirs, 2);
        assert_eq!(cadence.start_time, 0.5);
        assert!(matches!(CaseCadence::from_times(&[]), Err(PodError::NoSnapshots)));
    }

    #[test]
    fn restricted_cadence_stays_inside_selection() {
        let cadence = CaseCadence {
            time_span: 0.8,
            num_output_dirs: 8,
            start_time: 0.0,
        };

        let late = cadence.restrict(0.4, 0.8);
        assert!((late.time_span - 0.4).abs() < 1e-12);
        assert_eq!(late.num_output_dirs, 4);
        assert_eq!(late.start_time, 0.4);
        assert!(late.end_time() <= 0.8 + 1e-12);

        let early = cadence.restrict(0.0, 0.3);
        assert!((early.time_span - 0.3).abs() < 1e-12);
        assert_eq!(early.num_output_dirs, 3);

        assert_eq!(cadence.restrict(0.0, 0.8), cadence);
    }
}
