use podrom::case::pipeline;
use podrom::case::{CaseDir, SyntheticCase, TimeSelection};
use podrom::trace::Tracer;
use podrom::PodError;
use std::path::PathBuf;

fn usage() -> &'static str {
    "Usage:
  pod synth [--case DIR] [--snapshots N] [--modes N] [--no-control-dict]
  pod basis [N] [--case DIR] [--from T] [--to T]
  pod precompute [--case DIR] [--from T] [--to T]
  pod rom [--case DIR] [--modes N]
  pod reconstruct [--case DIR] [--from T] [--to T]
  pod project [N] [--case DIR] [--from T] [--to T]
  pod info [--case DIR] [--from T] [--to T]

Options:
  --case DIR      case directory (default: current directory)
  --from/--to T   restrict the snapshot time directories (inclusive)
  --trace FILE    append stage timings to FILE as JSON lines

Notes:
  - `basis N` writes the first N modes (0 or omitted: all snapshots).
  - `rom --modes N` integrates only the leading N modes of the precomputed system.
  - `project N` projects onto the first N modes (default: nDim from podDict).
  - RUST_LOG controls verbosity (default: info)."
}

#[derive(Debug, Default)]
struct Opts {
    case: Option<PathBuf>,
    count: Option<usize>,
    modes: Option<usize>,
    snapshots: Option<usize>,
    no_control_dict: bool,
    from: Option<f64>,
    to: Option<f64>,
    trace: Option<PathBuf>,
}

impl Opts {
    fn case_root(&self) -> PathBuf {
        self.case.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    fn selection(&self) -> TimeSelection {
        TimeSelection {
            from: self.from,
            to: self.to,
        }
    }
}

fn parse_value<T: std::str::FromStr>(
    it: &mut std::slice::Iter<'_, String>,
    flag: &str,
) -> Result<T, String> {
    let Some(v) = it.next() else {
        return Err(format!("missing value after {flag}"));
    };
    v.parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{v}'"))
}

fn parse_opts(args: &[String]) -> Result<Opts, String> {
    let mut opts = Opts::default();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--case" => opts.case = Some(parse_value(&mut it, "--case")?),
            "--modes" => opts.modes = Some(parse_value(&mut it, "--modes")?),
            "--snapshots" => opts.snapshots = Some(parse_value(&mut it, "--snapshots")?),
            "--from" => opts.from = Some(parse_value(&mut it, "--from")?),
            "--to" => opts.to = Some(parse_value(&mut it, "--to")?),
            "--trace" => opts.trace = Some(parse_value(&mut it, "--trace")?),
            "--no-control-dict" => opts.no_control_dict = true,
            v if v.starts_with("--") => return Err(format!("unknown option '{v}'")),
            v => {
                if opts.count.is_some() {
                    return Err(format!("unexpected positional argument '{v}'"));
                }
                opts.count = Some(
                    v.parse::<usize>()
                        .map_err(|_| format!("invalid mode count '{v}'"))?,
                );
            }
        }
    }
    Ok(opts)
}

fn open_tracer(command: &str, opts: &Opts) -> Result<Tracer, PodError> {
    match &opts.trace {
        Some(path) => Tracer::to_file(path, command, &opts.case_root()),
        None => Ok(Tracer::disabled()),
    }
}

fn run(command: &str, opts: &Opts) -> Result<(), PodError> {
    let mut tracer = open_tracer(command, opts)?;
    let selection = opts.selection();

    match command {
        "synth" => {
            let mut spec = SyntheticCase::default();
            if let Some(n) = opts.snapshots {
                spec.n_snapshots = n;
            }
            if let Some(n) = opts.modes {
                spec.pod_dict.n_dim = n;
            }
            spec.control_dict = !opts.no_control_dict;
            let case = tracer.stage("synth", || {
                podrom::case::write_synthetic_case(&opts.case_root(), &spec)
            })?;
            println!(
                "Wrote synthetic channel case to {} ({} snapshots, nDim = {})",
                case.root().display(),
                spec.n_snapshots,
                spec.pod_dict.n_dim
            );
        }
        "basis" => {
            let case = CaseDir::open(opts.case_root())?;
            let report =
                pipeline::run_basis(&case, opts.count.unwrap_or(0), &selection, &mut tracer)?;
            println!(
                "Wrote {} of {} modes to time {}",
                report.n_modes, report.n_snapshots, report.written_to
            );
            for row in report.energy.iter().take(report.n_modes) {
                println!(
                    "  mode {:>3}: {:>8.4}% (cumulative {:>8.4}%)",
                    row.mode, row.individual, row.cumulative
                );
            }
        }
        "precompute" => {
            let case = CaseDir::open(opts.case_root())?;
            let report = pipeline::run_precompute(&case, &selection, &mut tracer)?;
            println!(
                "Galerkin system for {} modes on {} cells; initial coefficients {:?}",
                report.info.n_dim, report.info.n_cells, report.initial
            );
        }
        "rom" => {
            let case = CaseDir::open(opts.case_root())?;
            let report = pipeline::run_rom(&case, opts.modes, &mut tracer)?;
            println!(
                "Integrated {} modes for {} steps; wrote {} rows (every {} steps)",
                report.dim, report.n_steps, report.rows_written, report.write_steps
            );
        }
        "reconstruct" => {
            let case = CaseDir::open(opts.case_root())?;
            let written = pipeline::run_reconstruct(&case, &selection, &mut tracer)?;
            println!("Wrote {} to {} time directories", pipeline::ROM_VELOCITY, written.len());
        }
        "project" => {
            let case = CaseDir::open(opts.case_root())?;
            let rows = pipeline::run_project(&case, opts.count, &selection, &mut tracer)?;
            println!("Wrote {} rows of POD coefficients", rows);
        }
        "info" => {
            let case = CaseDir::open(opts.case_root())?;
            print!("{}", pipeline::case_summary(&case, &selection)?);
        }
        other => {
            return Err(PodError::InvalidConfig(format!("unknown command '{other}'")));
        }
    }

    let traced = tracer.is_enabled();
    tracer.close()?;
    if let (true, Some(path)) = (traced, &opts.trace) {
        log::info!("Stage timings appended to {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", usage());
        std::process::exit(2);
    }

    let command = args[1].as_str();
    if !matches!(
        command,
        "synth" | "basis" | "precompute" | "rom" | "reconstruct" | "project" | "info"
    ) {
        eprintln!("[pod] unknown command '{}'\n\n{}", command, usage());
        std::process::exit(2);
    }

    let opts = match parse_opts(&args[2..]) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("[pod] {err}\n\n{}", usage());
            std::process::exit(2);
        }
    };

    if let Err(err) = run(command, &opts) {
        eprintln!("[pod] {err}");
        std::process::exit(1);
    }
}
