use anyhow::{bail, Context};
use clap::Parser;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use xacrodoc::{packages, MjcfOptions, MujocoCompile, XacroDoc, XacroError};

#[derive(Parser, Debug)]
#[command(name = "xacrodoc")]
#[command(
    about = "Convert a xacro file to URDF. Substitution arguments can be passed as key-value pairs of the form `key:=value`.",
    long_about = None
)]
#[command(version)]
struct Args {
    /// The xacro file to convert
    xacro_file: PathBuf,

    /// The output file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Convert the xacro file to an MJCF XML file
    #[arg(long = "mjcf")]
    mjcf: bool,

    /// Localize the file by copying all assets to a local directory
    #[arg(short = 'c', long = "copy-assets-to", value_name = "DIR")]
    copy_assets_to: Option<PathBuf>,

    /// Directories in which to search for packages
    #[arg(short = 'd', long = "pkg-dir", value_name = "DIR")]
    pkg_dir: Vec<PathBuf>,

    /// Mappings of package names to paths, of the form 'name:=path'
    #[arg(short = 'p', long = "pkg-path", value_name = "NAME:=PATH")]
    pkg_path: Vec<String>,

    /// Quiet operation, suppress warnings
    #[arg(short = 'q', conflicts_with = "verbose")]
    quiet: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Set verbosity level explicitly (0-4)
    #[arg(
        long = "verbosity",
        value_name = "LEVEL",
        conflicts_with = "verbose",
        conflicts_with = "quiet"
    )]
    verbosity_level: Option<u8>,

    /// Substitution arguments in key:=value format
    subargs: Vec<String>,
}

impl Args {
    fn get_verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else if let Some(level) = self.verbosity_level {
            level.min(4)
        } else {
            1 + self.verbose.min(3)
        }
    }
}

fn init_logging(verbosity: u8) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = match verbosity {
        0 => LevelFilter::Off,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new().filter_level(level).init();
}

/// Split `name:=value` pairs; `what` names the pairs in the error message.
fn parse_mappings(
    raw: &[String],
    what: &str,
) -> anyhow::Result<HashMap<String, String>> {
    raw.iter()
        .map(|item| match item.split_once(":=") {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => bail!(
                "expected {} of the form 'name:=value', but got '{}'",
                what,
                item
            ),
        })
        .collect()
}

/// `dir` relative to `base`; both are made absolute first.
fn relative_to(
    dir: &Path,
    base: &Path,
) -> anyhow::Result<PathBuf> {
    let dir = std::path::absolute(dir)?;
    let base = std::path::absolute(base)?;
    Ok(pathdiff::diff_paths(&dir, &base).unwrap_or(dir))
}

fn run(args: &Args) -> anyhow::Result<()> {
    let converter = if args.mjcf {
        Some(MujocoCompile::locate().context(
            "You must have MuJoCo's compile program installed to export MJCF XML files.",
        )?)
    } else {
        None
    };

    let subargs = parse_mappings(&args.subargs, "substitution argument")?;

    if !args.pkg_dir.is_empty() {
        packages::look_in(&args.pkg_dir, 0);
    }
    let pkg_paths = parse_mappings(&args.pkg_path, "package path mapping")?;
    if !pkg_paths.is_empty() {
        packages::update_package_cache(pkg_paths);
    }

    let mut doc = XacroDoc::builder()
        .subargs(subargs)
        .compile_file(&args.xacro_file)?;

    // Localizing assets is recommended for MJCF output
    let options = match &args.copy_assets_to {
        Some(asset_dir) => {
            doc.localize_assets(asset_dir)?;
            eprintln!("Copied assets to '{}'", asset_dir.display());
            let meshdir = match &args.output {
                Some(output) => {
                    let parent = match output.parent() {
                        Some(p) if !p.as_os_str().is_empty() => p,
                        _ => Path::new("."),
                    };
                    relative_to(asset_dir, parent)?
                }
                None => asset_dir.clone(),
            };
            MjcfOptions::new().strippath(true).meshdir(meshdir)
        }
        None => MjcfOptions::new().strippath(false),
    };

    match (&args.output, &converter) {
        (Some(output), Some(converter)) => doc.to_mjcf_file_with(output, &options, converter)?,
        (Some(output), None) => {
            doc.to_urdf_file(output, false)?;
        }
        (None, Some(converter)) => {
            println!("{}", doc.to_mjcf_string_with(&options, converter)?);
        }
        (None, None) => {
            let mut stdout = io::stdout();
            stdout.write_all(doc.to_urdf_string(true)?.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.get_verbosity());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<XacroError>().and_then(XacroError::missing_package) {
                Some(pkg) => {
                    eprintln!("Error: package not found: {}", pkg);
                    eprintln!(
                        "You can specify additional package locations with --pkg-dir or --pkg-path."
                    );
                    eprintln!("See --help for more details.");
                }
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
