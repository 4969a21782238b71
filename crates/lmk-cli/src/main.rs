use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lmk_core::Landmark;
use lmk_pipeline::{compare_landmarks, register_files, write_results, NoDataCaps, Parameters};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Landmark registration and comparison.
#[derive(Debug, Parser)]
#[command(author, version, about = "Landmark registration and comparison tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a child landmark onto a base landmark.
    Register {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        child: PathBuf,
        /// JSON parameters. Defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for overlay images.
        #[arg(long)]
        diagnostics: Option<PathBuf>,
    },
    /// Dense displacement between two landmarks, written as raw f32 rasters.
    Compare {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        child: PathBuf,
        #[arg(long)]
        output_prefix: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Most no-data cells per child template; negative is unlimited.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        nan_max_child: i64,
        /// Most no-data cells per base search window; negative is unlimited.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        nan_max_base: i64,
    },
    /// Print a landmark header as JSON.
    Info { landmark: PathBuf },
}

fn load_params(path: Option<&Path>) -> Result<Parameters> {
    match path {
        Some(p) => Parameters::load(p),
        None => Ok(Parameters::default()),
    }
}

fn load_landmark(path: &Path) -> Result<Landmark> {
    Landmark::load(path).with_context(|| format!("failed to load landmark {}", path.display()))
}

fn run_register(base: &Path, child: &Path, config: Option<&Path>, diagnostics: Option<&Path>) -> Result<String> {
    let params = load_params(config)?;
    if let Some(dir) = diagnostics {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let reg = register_files(base, child, params, diagnostics)?;
    Ok(reg.state().to_json()?)
}

fn run_compare(
    base: &Path,
    child: &Path,
    prefix: &Path,
    config: Option<&Path>,
    caps: NoDataCaps,
) -> Result<Vec<PathBuf>> {
    let params = load_params(config)?;
    let base = load_landmark(base)?;
    let child = load_landmark(child)?;
    let mut rng = StdRng::seed_from_u64(params.registration.seed);
    let cmp = compare_landmarks(&child, &base, &params, caps, &mut rng)?;
    let written = write_results(prefix, &cmp.results)?;
    for p in &written {
        info!("wrote {}", p.display());
    }
    Ok(written)
}

fn run_info(path: &Path) -> Result<String> {
    let lmk = load_landmark(path)?;
    Ok(serde_json::to_string_pretty(&lmk.header())?)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Register {
            base,
            child,
            config,
            diagnostics,
        } => {
            let json = run_register(&base, &child, config.as_deref(), diagnostics.as_deref())?;
            println!("{json}");
        }
        Command::Compare {
            base,
            child,
            output_prefix,
            config,
            nan_max_child,
            nan_max_base,
        } => {
            let caps = NoDataCaps {
                child: nan_max_child,
                base: nan_max_base,
            };
            for p in run_compare(&base, &child, &output_prefix, config.as_deref(), caps)? {
                println!("{}", p.display());
            }
        }
        Command::Info { landmark } => println!("{}", run_info(&landmark)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use lmk_core::Planet;
    use std::fs;
    use tempfile::{tempdir, NamedTempFile};

    fn flat_landmark(path: &Path) -> Landmark {
        let mut lmk = Landmark::from_geodetic(Planet::Mars, "site", 60, 50, 5.0, 18.4, 77.5, 0.0).unwrap();
        lmk.ele_mut().fill(-2500.0);
        lmk.save(path).unwrap();
        lmk
    }

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn info_prints_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site.lmk");
        flat_landmark(&path);
        let json = run_info(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["id"], "site");
        assert_eq!(v["num_cols"], 60);
        assert_eq!(v["num_rows"], 50);
    }

    #[test]
    fn compare_writes_four_rasters() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("base.lmk");
        let child = dir.path().join("child.lmk");
        flat_landmark(&base);
        flat_landmark(&child);
        let prefix = dir.path().join("out");
        let written = run_compare(&base, &child, &prefix, None, NoDataCaps::default()).unwrap();
        assert_eq!(written.len(), 4);
        for p in &written {
            assert_eq!(fs::metadata(p).unwrap().len(), 60 * 50 * 4);
        }
        assert!(written[2].to_string_lossy().ends_with("out_delta_z_60by50.raw"));
    }

    #[test]
    fn register_failure_leaves_no_output() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("base.lmk");
        let child = dir.path().join("child.lmk");
        flat_landmark(&base);
        flat_landmark(&child);
        assert!(run_register(&base, &child, None, None).is_err());
        assert!(!dir.path().join("child_registered.lmk").exists());
    }

    #[test]
    fn config_file_is_applied() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{ "registration": { "seed": 42 } }"#).unwrap();
        let p = load_params(Some(file.path())).unwrap();
        assert_eq!(p.registration.seed, 42);
        assert_eq!(p.feature_match.correlation_window_size, 25);
    }

    #[test]
    fn missing_config_is_an_error() {
        assert!(load_params(Some(Path::new("/nonexistent/params.json"))).is_err());
    }
}
