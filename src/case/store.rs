use crate::error::{PodError, PodResult};
use crate::solver::mesh::Mesh;
use crate::solver::VectorField;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Two time values closer than this name the same time directory.
const TIME_MATCH_TOLERANCE: f64 = 1e-9;
const TIME_NAME_SCALE: f64 = 1e9;

pub const MESH_FILE: &str = "mesh.json";
pub const CONSTANT_DIR: &str = "constant";
pub const SYSTEM_DIR: &str = "system";

/// A time directory: its numeric value and the exact name on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDir {
    pub value: f64,
    pub name: String,
}

impl TimeDir {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            name: time_name(value),
        }
    }
}

/// Canonical directory name for a time value (rounded to 1e-9, shortest
/// representation).
pub fn time_name(value: f64) -> String {
    let rounded = (value * TIME_NAME_SCALE).round() / TIME_NAME_SCALE;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{}", rounded)
}

/// Inclusive time window, the equivalent of a `-time from:to` selector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeSelection {
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl TimeSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, t: f64) -> bool {
        self.from.map_or(true, |from| t >= from - TIME_MATCH_TOLERANCE)
            && self.to.map_or(true, |to| t <= to + TIME_MATCH_TOLERANCE)
    }

    pub fn apply(&self, times: &[TimeDir]) -> Vec<TimeDir> {
        times.iter().filter(|t| self.contains(t.value)).cloned().collect()
    }
}

/// Persisted fields keyed by name and time.
pub trait SnapshotStore {
    /// All time directories, ordered by value.
    fn list_times(&self) -> PodResult<Vec<TimeDir>>;

    fn load(&self, name: &str, time: &TimeDir) -> PodResult<VectorField>;

    fn save(&self, name: &str, time: &TimeDir, field: &VectorField) -> PodResult<()>;

    fn has_field(&self, name: &str, time: &TimeDir) -> bool;

    fn mesh(&self) -> PodResult<Mesh>;

    fn cell_volumes(&self) -> PodResult<Vec<f64>> {
        Ok(self.mesh()?.cell_vol)
    }
}

/// Case directory on disk:
///
/// ```text
/// <root>/mesh.json
/// <root>/constant/podDict.json
/// <root>/system/controlDict.json
/// <root>/<time>/<field>.json
/// <root>/*.csv
/// ```
#[derive(Debug, Clone)]
pub struct CaseDir {
    root: PathBuf,
}

impl CaseDir {
    pub fn open(root: impl Into<PathBuf>) -> PodResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PodError::io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "case directory not found"),
            ));
        }
        Ok(Self { root })
    }

    pub fn create(root: impl Into<PathBuf>) -> PodResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|err| PodError::io(&root, err))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file in the case root (stage CSV outputs).
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn constant_file(&self, name: &str) -> PathBuf {
        self.root.join(CONSTANT_DIR).join(name)
    }

    pub fn system_file(&self, name: &str) -> PathBuf {
        self.root.join(SYSTEM_DIR).join(name)
    }

    pub fn field_path(&self, name: &str, time: &TimeDir) -> PathBuf {
        self.root.join(&time.name).join(format!("{name}.json"))
    }

    pub fn write_mesh(&self, mesh: &Mesh) -> PodResult<()> {
        write_json(&self.file(MESH_FILE), mesh)
    }

    /// Field names present in a time directory.
    pub fn fields_at(&self, time: &TimeDir) -> PodResult<Vec<String>> {
        let dir = self.root.join(&time.name);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|err| PodError::io(&dir, err))? {
            let entry = entry.map_err(|err| PodError::io(&dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Existing time directory matching `value`, or a new one named
    /// canonically.
    pub fn time_dir_for(&self, value: f64) -> PodResult<TimeDir> {
        let existing = self
            .list_times()?
            .into_iter()
            .find(|t| (t.value - value).abs() <= TIME_MATCH_TOLERANCE);
        Ok(existing.unwrap_or_else(|| TimeDir::new(value)))
    }
}

impl SnapshotStore for CaseDir {
    fn list_times(&self) -> PodResult<Vec<TimeDir>> {
        let mut times = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|err| PodError::io(&self.root, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| PodError::io(&self.root, err))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(value) = name.parse::<f64>() {
                if value.is_finite() {
                    times.push(TimeDir { value, name });
                }
            }
        }
        times.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(times)
    }

    fn load(&self, name: &str, time: &TimeDir) -> PodResult<VectorField> {
        let path = self.field_path(name, time);
        if !path.is_file() {
            return Err(PodError::MissingField {
                name: name.to_string(),
                time: time.name.clone(),
            });
        }
        let field: VectorField = read_json(&path)?;
        if !field.is_consistent() {
            return Err(PodError::format(
                &path,
                1,
                "vx and vy have different lengths",
            ));
        }
        log::debug!("Read {} at t = {} ({} cells)", name, time.name, field.len());
        Ok(field)
    }

    fn save(&self, name: &str, time: &TimeDir, field: &VectorField) -> PodResult<()> {
        let dir = self.root.join(&time.name);
        std::fs::create_dir_all(&dir).map_err(|err| PodError::io(&dir, err))?;
        write_json(&self.field_path(name, time), field)
    }

    fn has_field(&self, name: &str, time: &TimeDir) -> bool {
        self.field_path(name, time).is_file()
    }

    fn mesh(&self) -> PodResult<Mesh> {
        let path = self.file(MESH_FILE);
        let mesh: Mesh = read_json(&path)?;
        mesh.validate().map_err(PodError::InvalidMesh)?;
        Ok(mesh)
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> PodResult<T> {
    let file = std::fs::File::open(path).map_err(|err| PodError::io(path, err))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|err| PodError::json(path, err))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> PodResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| PodError::io(parent, err))?;
    }
    let file = std::fs::File::create(path).map_err(|err| PodError::io(path, err))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|err| PodError::json(path, err))?;
    std::io::Write::flush(&mut writer).map_err(|err| PodError::io(path, err))
}
