//! Flat files handed between pipeline stages. Every real number is written
//! fixed-point with 16 fractional digits; counts and indices are integers.

use crate::error::{PodError, PodResult};
use crate::pod::basis::EnergyRow;
use crate::pod::galerkin::{GalerkinSystem, QuadraticTensor};
use nalgebra::{DMatrix, DVector};
use std::io::{BufWriter, Write};
use std::path::Path;

pub const POD_ENERGY_CSV: &str = "podEnergy.csv";
pub const POD_INFO_CSV: &str = "podInfo.csv";
pub const PREV_VALS_CSV: &str = "prevVals.csv";
pub const CONSTANT_CSV: &str = "constant.csv";
pub const LINEAR_CSV: &str = "linear.csv";
pub const QUADRATIC_CSV: &str = "quadratic.csv";
pub const AVALS_CSV: &str = "avals.csv";
pub const APOD_CSV: &str = "aPOD.csv";

const ENERGY_HEADER: &str = "mode,individual_energy_percent,cumulative_energy_percent,eigenvalue";

/// Scalars handed from `precompute` to `rom`, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct PodInfo {
    pub n_dim: usize,
    pub nu: f64,
    pub write_freq: usize,
    pub t_end: f64,
    pub dt: f64,
    pub n_cells: usize,
    pub case_time_span: f64,
    pub num_output_dirs: usize,
    pub start_time: f64,
}

struct CsvWriter<'a> {
    path: &'a Path,
    out: BufWriter<std::fs::File>,
}

impl<'a> CsvWriter<'a> {
    fn create(path: &'a Path) -> PodResult<Self> {
        let file = std::fs::File::create(path).map_err(|err| PodError::io(path, err))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) -> PodResult<()> {
        self.out
            .write_fmt(args)
            .and_then(|_| self.out.write_all(b"\n"))
            .map_err(|err| PodError::io(self.path, err))
    }

    fn finish(mut self) -> PodResult<()> {
        self.out.flush().map_err(|err| PodError::io(self.path, err))
    }
}

/// Non-empty lines with their 1-based line numbers.
fn read_lines(path: &Path) -> PodResult<Vec<(usize, String)>> {
    let text = std::fs::read_to_string(path).map_err(|err| PodError::io(path, err))?;
    Ok(text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim().to_string()))
        .filter(|(_, l)| !l.is_empty())
        .collect())
}

/// Comma-separated cells of a line; a trailing comma does not add a cell.
fn cells(line: &str) -> Vec<&str> {
    let line = line.strip_suffix(',').unwrap_or(line);
    line.split(',').map(str::trim).collect()
}

fn parse_f64(path: &Path, line: usize, cell: &str) -> PodResult<f64> {
    cell.parse::<f64>()
        .map_err(|_| PodError::format(path, line, format!("'{cell}' is not a number")))
}

fn parse_index(path: &Path, line: usize, cell: &str) -> PodResult<usize> {
    cell.parse::<usize>()
        .map_err(|_| PodError::format(path, line, format!("'{cell}' is not an index")))
}

fn expect_cells<'l>(path: &Path, line: usize, text: &'l str, n: usize) -> PodResult<Vec<&'l str>> {
    let row = cells(text);
    if row.len() != n {
        return Err(PodError::format(
            path,
            line,
            format!("expected {n} columns, found {}", row.len()),
        ));
    }
    Ok(row)
}

pub fn write_energy(path: &Path, table: &[EnergyRow]) -> PodResult<()> {
    let mut w = CsvWriter::create(path)?;
    w.line(format_args!("{ENERGY_HEADER}"))?;
    for row in table {
        w.line(format_args!(
            "{},{:.16},{:.16},{:.16}",
            row.mode, row.individual, row.cumulative, row.eigenvalue
        ))?;
    }
    w.finish()
}

pub fn read_energy(path: &Path) -> PodResult<Vec<EnergyRow>> {
    let mut rows = Vec::new();
    for (line, text) in read_lines(path)? {
        // Header
        if line == 1 && text.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        let row = expect_cells(path, line, &text, 4)?;
        rows.push(EnergyRow {
            mode: parse_index(path, line, row[0])?,
            individual: parse_f64(path, line, row[1])?,
            cumulative: parse_f64(path, line, row[2])?,
            eigenvalue: parse_f64(path, line, row[3])?,
        });
    }
    Ok(rows)
}

pub fn write_pod_info(path: &Path, info: &PodInfo) -> PodResult<()> {
    let mut w = CsvWriter::create(path)?;
    w.line(format_args!("{}", info.n_dim))?;
    w.line(format_args!("{:.16}", info.nu))?;
    w.line(format_args!("{}", info.write_freq))?;
    w.line(format_args!("{:.16}", info.t_end))?;
    w.line(format_args!("{:.16}", info.dt))?;
    w.line(format_args!("{}", info.n_cells))?;
    w.line(format_args!("{:.16}", info.case_time_span))?;
    w.line(format_args!("{}", info.num_output_dirs))?;
    w.line(format_args!("{:.16}", info.start_time))?;
    w.finish()
}

pub fn read_pod_info(path: &Path) -> PodResult<PodInfo> {
    let lines = read_lines(path)?;
    if lines.len() != 9 {
        return Err(PodError::format(
            path,
            lines.len(),
            format!("expected 9 values, found {}", lines.len()),
        ));
    }
    let f = |i: usize| parse_f64(path, lines[i].0, &lines[i].1);
    // Counts may have been written as reals by other tools
    let count = |i: usize| -> PodResult<usize> {
        let v = f(i)?;
        if v < 0.0 || v.fract() != 0.0 {
            return Err(PodError::format(path, lines[i].0, format!("'{v}' is not a count")));
        }
        Ok(v as usize)
    };

    Ok(PodInfo {
        n_dim: count(0)?,
        nu: f(1)?,
        write_freq: count(2)?,
        t_end: f(3)?,
        dt: f(4)?,
        n_cells: count(5)?,
        case_time_span: f(6)?,
        num_output_dirs: count(7)?,
        start_time: f(8)?,
    })
}

/// One value per line (`prevVals.csv`).
pub fn write_values(path: &Path, values: &DVector<f64>) -> PodResult<()> {
    let mut w = CsvWriter::create(path)?;
    for v in values.iter() {
        w.line(format_args!("{:.16}", v))?;
    }
    w.finish()
}

pub fn read_values(path: &Path) -> PodResult<DVector<f64>> {
    let values = read_lines(path)?
        .iter()
        .map(|(line, text)| {
            let row = expect_cells(path, *line, text, 1)?;
            parse_f64(path, *line, row[0])
        })
        .collect::<PodResult<Vec<f64>>>()?;
    Ok(DVector::from_vec(values))
}

fn write_indexed<'v>(path: &Path, values: impl Iterator<Item = &'v f64>) -> PodResult<()> {
    let mut w = CsvWriter::create(path)?;
    for (i, v) in values.enumerate() {
        w.line(format_args!("{},{:.16}", i, v))?;
    }
    w.finish()
}

/// Reads `index, value` rows into a dense vector of length `len`. Every
/// index must appear exactly once.
fn read_indexed(path: &Path, len: usize) -> PodResult<Vec<f64>> {
    let mut out = vec![0.0; len];
    let mut seen = vec![false; len];
    for (line, text) in read_lines(path)? {
        let row = expect_cells(path, line, &text, 2)?;
        let idx = parse_index(path, line, row[0])?;
        if idx >= len {
            return Err(PodError::format(
                path,
                line,
                format!("index {idx} out of range for {len} entries"),
            ));
        }
        if seen[idx] {
            return Err(PodError::format(path, line, format!("duplicate index {idx}")));
        }
        seen[idx] = true;
        out[idx] = parse_f64(path, line, row[1])?;
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(PodError::format(
            path,
            0,
            format!("index {missing} missing (expected {len} entries)"),
        ));
    }
    Ok(out)
}

pub fn write_constant(path: &Path, constant: &DVector<f64>) -> PodResult<()> {
    write_indexed(path, constant.iter())
}

pub fn read_constant(path: &Path, n_dim: usize) -> PodResult<DVector<f64>> {
    Ok(DVector::from_vec(read_indexed(path, n_dim)?))
}

/// `flatIndex = k + nDim*m`, i.e. nalgebra's column-major order.
pub fn write_linear(path: &Path, linear: &DMatrix<f64>) -> PodResult<()> {
    write_indexed(path, linear.iter())
}

pub fn read_linear(path: &Path, n_dim: usize) -> PodResult<DMatrix<f64>> {
    Ok(DMatrix::from_vec(n_dim, n_dim, read_indexed(path, n_dim * n_dim)?))
}

/// `flatIndex = k + nDim*m + nDim^2*n`
pub fn write_quadratic(path: &Path, quadratic: &QuadraticTensor) -> PodResult<()> {
    write_indexed(path, quadratic.as_flat().iter())
}

pub fn read_quadratic(path: &Path, n_dim: usize) -> PodResult<QuadraticTensor> {
    QuadraticTensor::from_flat(n_dim, read_indexed(path, n_dim * n_dim * n_dim)?)
}

pub fn write_galerkin(dir: &Path, system: &GalerkinSystem) -> PodResult<()> {
    write_constant(&dir.join(CONSTANT_CSV), &system.constant)?;
    write_linear(&dir.join(LINEAR_CSV), &system.linear)?;
    write_quadratic(&dir.join(QUADRATIC_CSV), &system.quadratic)
}

pub fn read_galerkin(dir: &Path, n_dim: usize) -> PodResult<GalerkinSystem> {
    Ok(GalerkinSystem {
        constant: read_constant(&dir.join(CONSTANT_CSV), n_dim)?,
        linear: read_linear(&dir.join(LINEAR_CSV), n_dim)?,
        quadratic: read_quadratic(&dir.join(QUADRATIC_CSV), n_dim)?,
    })
}

/// `time, a_0, ..., a_{N-1},` per row (`avals.csv`, `aPOD.csv`).
pub fn write_coefficient_rows<'a, I>(path: &Path, rows: I) -> PodResult<usize>
where
    I: IntoIterator<Item = (f64, &'a DVector<f64>)>,
{
    let mut w = CsvWriter::create(path)?;
    let mut count = 0;
    for (time, a) in rows {
        let mut line = format!("{:.16},", time);
        for v in a.iter() {
            line.push_str(&format!("{:.16},", v));
        }
        w.line(format_args!("{line}"))?;
        count += 1;
    }
    w.finish()?;
    Ok(count)
}

pub fn read_coefficient_rows(path: &Path) -> PodResult<Vec<(f64, DVector<f64>)>> {
    let mut rows: Vec<(f64, DVector<f64>)> = Vec::new();
    for (line, text) in read_lines(path)? {
        let row = cells(&text);
        let time = parse_f64(path, line, row[0])?;
        let a = row[1..]
            .iter()
            .map(|c| parse_f64(path, line, c))
            .collect::<PodResult<Vec<f64>>>()?;
        if let Some((_, first)) = rows.first() {
            if first.len() != a.len() {
                return Err(PodError::format(
                    path,
                    line,
                    format!("expected {} coefficients, found {}", first.len(), a.len()),
                ));
            }
        }
        rows.push((time, DVector::from_vec(a)));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::basis::energy_table;

    #[test]
    fn energy_file_has_header_and_integer_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POD_ENERGY_CSV);
        let table = energy_table(&[3.0, 1.0]);
        write_energy(&path, &table).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ENERGY_HEADER);
        assert_eq!(lines[1], "1,75.0000000000000000,75.0000000000000000,3.0000000000000000");
        assert_eq!(read_energy(&path).unwrap(), table);
    }

    #[test]
    fn pod_info_keeps_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POD_INFO_CSV);
        let info = PodInfo {
            n_dim: 3,
            nu: 0.01,
            write_freq: 0,
            t_end: 0.0,
            dt: 0.001,
            n_cells: 120,
            case_time_span: 2.0,
            num_output_dirs: 20,
            start_time: 0.1,
        };
        write_pod_info(&path, &info).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "3");
        assert_eq!(lines[1], "0.0100000000000000");
        assert_eq!(lines[5], "120");
        assert_eq!(read_pod_info(&path).unwrap(), info);
    }

    #[test]
    fn pod_info_accepts_real_valued_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(POD_INFO_CSV);
        std::fs::write(&path, "2.0\n0.01\n0\n0\n0.1\n40.0\n1\n10\n0\n").unwrap();
        let info = read_pod_info(&path).unwrap();
        assert_eq!(info.n_dim, 2);
        assert_eq!(info.n_cells, 40);
    }

    #[test]
    fn tensor_files_use_flat_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut quadratic = QuadraticTensor::zeros(2);
        quadratic.set(1, 0, 1, 7.5);
        let system = GalerkinSystem {
            constant: DVector::from_vec(vec![1.0, -2.0]),
            linear: DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]),
            quadratic,
        };
        write_galerkin(dir.path(), &system).unwrap();

        let linear = std::fs::read_to_string(dir.path().join(LINEAR_CSV)).unwrap();
        // L[k=0, m=1] = 2 lives at 0 + 2*1
        assert_eq!(linear.lines().nth(2), Some("2,2.0000000000000000"));
        let quad = std::fs::read_to_string(dir.path().join(QUADRATIC_CSV)).unwrap();
        assert_eq!(quad.lines().nth(5), Some("5,7.5000000000000000"));

        assert_eq!(read_galerkin(dir.path(), 2).unwrap(), system);
    }

    #[test]
    fn indexed_reader_rejects_gaps_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONSTANT_CSV);

        std::fs::write(&path, "0,1.0\n2,3.0\n").unwrap();
        assert!(matches!(read_constant(&path, 3), Err(PodError::Format { .. })));

        std::fs::write(&path, "0,1.0\n1,abc\n").unwrap();
        assert!(matches!(
            read_constant(&path, 2),
            Err(PodError::Format { line: 2, .. })
        ));

        std::fs::write(&path, "0,1.0\n5,1.0\n").unwrap();
        assert!(matches!(read_constant(&path, 2), Err(PodError::Format { .. })));

        assert!(matches!(
            read_constant(&dir.path().join("missing.csv"), 2),
            Err(PodError::Io { .. })
        ));
    }

    #[test]
    fn coefficient_rows_have_trailing_comma() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AVALS_CSV);
        let a0 = DVector::from_vec(vec![0.5, -0.25]);
        let a1 = DVector::from_vec(vec![0.125, 1.0]);
        let n = write_coefficient_rows(&path, [(0.0, &a0), (0.1, &a1)]).unwrap();
        assert_eq!(n, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("0.0000000000000000,0.5000000000000000,-0.2500000000000000,")
        );

        let rows = read_coefficient_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].0, 0.1);
        assert_eq!(rows[1].1, a1);
    }

    #[test]
    fn values_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREV_VALS_CSV);
        let a = DVector::from_vec(vec![1.0 / 3.0, -2.0, 0.0]);
        write_values(&path, &a).unwrap();
        let back = read_values(&path).unwrap();
        assert!((back - a).amax() < 1e-15);
    }
}
