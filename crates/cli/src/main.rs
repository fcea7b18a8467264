//! `fission`: reports whether the functions selected by name prefix can be
//! split out of a wasm module without breaking its call graph.
//!
//! ```text
//! fission app.wasm --go-runtime
//! fission app.wasm fmt. strconv. --sequential -vv
//! ```

use std::{fs, io::Write, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser};
use fission_analysis::{SplitConfig, Splitter, StubShape};
use fission_module::Module;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fission")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Checks that a set of functions can be split out of a wasm module", long_about = None)]
struct Cli {
    /// The wasm module to analyze
    module: PathBuf,

    /// Name prefixes selecting the functions to split out
    prefixes: Vec<String>,

    /// Also select the Go runtime and compiler helpers
    #[arg(long)]
    go_runtime: bool,

    /// Check candidates one at a time instead of on the thread pool
    #[arg(long)]
    sequential: bool,

    /// Skip the stub size estimate
    #[arg(long)]
    no_stubs: bool,

    /// Global holding the shadow stack pointer
    #[arg(long, env = "FISSION_SP_GLOBAL", default_value_t = 0)]
    sp_global: u32,

    /// Bytes reserved per shadow stack frame
    #[arg(long, env = "FISSION_FRAME_SIZE", default_value_t = 8)]
    frame_size: i32,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> SplitConfig {
        let base = if self.go_runtime {
            SplitConfig::go_runtime()
        } else {
            SplitConfig::default()
        };

        SplitConfig {
            parallel: !self.sequential,
            estimate_stubs: !self.no_stubs,
            stub_shape: StubShape {
                sp_global: self.sp_global,
                frame_size: self.frame_size,
            },
            ..base.with_prefixes(self.prefixes.iter().cloned())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.prefixes.is_empty() && !cli.go_runtime {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "pass at least one PREFIX or --go-runtime",
            )
            .exit();
    }

    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let bytes = fs::read(&cli.module)
        .with_context(|| format!("cannot read {}", cli.module.display()))?;
    tracing::debug!(path = %cli.module.display(), len = bytes.len(), "read module");

    let mut out = std::io::stdout().lock();
    analyze_bytes(&bytes, cli.config(), &mut out)
}

fn analyze_bytes(bytes: &[u8], config: SplitConfig, out: &mut impl Write) -> Result<()> {
    let module = Module::parse(bytes).context("cannot decode module")?;

    for section in module.sections() {
        writeln!(
            out,
            "{:<12} {:>9}",
            section.name,
            human_bytes(section.size as u64)
        )?;
    }

    let splitter = Splitter::new(&module, config)?;
    let report = splitter.run()?;

    writeln!(out, "{report}")?;
    writeln!(
        out,
        "will split {} of {}",
        human_bytes(report.stats.split_bytes as u64),
        human_bytes(report.stats.total_bytes as u64)
    )?;
    Ok(())
}

/// SI-unit byte count: `999 B`, `1.2 kB`, `34 MB`.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 1000 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }

    if value < 10.0 {
        format!("{value:.1} {unit}")
    } else {
        format!("{value:.0} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_si_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(999), "999 B");
        assert_eq!(human_bytes(1234), "1.2 kB");
        assert_eq!(human_bytes(56_789), "57 kB");
        assert_eq!(human_bytes(3_400_000), "3.4 MB");
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "fission",
            "app.wasm",
            "fmt.",
            "--go-runtime",
            "--sequential",
            "--frame-size",
            "16",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let config = cli.config();
        assert!(config.matches("fmt.Println"));
        assert!(config.matches("runtime.gcStart"));
        assert!(!config.parallel);
        assert!(config.estimate_stubs);
        assert_eq!(config.stub_shape.frame_size, 16);
    }

    #[test]
    fn module_is_required() {
        let err = Cli::try_parse_from(["fission"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn prints_sections_and_report() {
        let bytes = wat::parse_str(
            r#"
            (module
              (import "env" "log" (func $log (param i32)))
              (func $pkg.a i32.const 1 call $log)
              (func $main call $pkg.a))
            "#,
        )
        .unwrap();

        let mut out = Vec::new();
        let config = SplitConfig::default().with_prefixes(["pkg."]);
        analyze_bytes(&bytes, config, &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("import"), "{out}");
        assert!(out.contains("functions: 1"), "{out}");
        assert!(out.contains("will split"), "{out}");

        let config = SplitConfig::default().with_prefixes(["main"]);
        let err = analyze_bytes(&bytes, config, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("calls pkg.a"), "{err}");
    }
}
