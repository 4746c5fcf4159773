// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::path::{Path, PathBuf};

use clap::Parser;
use clap_derive::{Parser, Subcommand};
use eyre::WrapErr;
use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use opl_compiler::{
    CompileOptions, DecompileOptions, compile_unit, decompile_with, disassemble, tokenize,
};
use qcode::Target;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, help = "Compile for the extended instruction set")]
    extended: bool,

    #[arg(long, help = "Spaces per nesting level in decompiled source")]
    indent: Option<usize>,

    #[arg(long, help = "Leave GLOBAL / LOCAL / EXTERNAL lines out of decompiled source")]
    no_declarations: bool,

    #[arg(long, help = "Yaml config file to use, overrides values in CLI args")]
    config_file: Option<PathBuf>,

    #[arg(long, help = "Enable debug logging")]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile OPL source to QCode.
    Compile {
        input: PathBuf,
        #[arg(short, long, help = "Output path; defaults to the input with a .ob extension")]
        output: Option<PathBuf>,
    },
    /// Reconstruct OPL source from QCode.
    Decompile {
        input: PathBuf,
        #[arg(long, help = "Procedure name; defaults to the upper-cased file stem")]
        name: Option<String>,
        #[arg(short, long, help = "Write the source here instead of stdout")]
        output: Option<PathBuf>,
    },
    /// List the header and instructions of a QCode file.
    Disasm { input: PathBuf },
    /// Print the token stream of an OPL source file.
    Tokens { input: PathBuf },
}

/// Settings that may come from the command line or a YAML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    compile: CompileOptions,
    decompile: DecompileOptions,
}

impl Config {
    fn from_args(args: &Args) -> Self {
        let mut config = Config::default();
        if args.extended {
            config.compile.target = Target::Extended;
        }
        if let Some(indent) = args.indent {
            config.decompile.indent = indent;
        }
        config.decompile.emit_declarations = !args.no_declarations;
        config
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_span_events(fmt::format::FmtSpan::NONE),
        )
        .with(filter)
        .init();
}

fn read(path: &Path) -> eyre::Result<Vec<u8>> {
    std::fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))
}

fn proc_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "MAIN".to_string())
}

fn emit(output: Option<&Path>, text: &str) -> eyre::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text).wrap_err_with(|| format!("writing {}", path.display()))
        }
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing(args.debug);

    let mut figment = Figment::new().merge(Serialized::defaults(Config::from_args(&args)));
    if let Some(config_file) = &args.config_file {
        figment = figment.merge(Yaml::file(config_file));
    }
    let config: Config = figment.extract().wrap_err("loading configuration")?;
    debug!(?config, "configuration");

    match &args.command {
        Command::Compile { input, output } => {
            let source = String::from_utf8_lossy(&read(input)?).into_owned();
            let unit = compile_unit(&source, &config.compile)
                .wrap_err_with(|| format!("compiling {}", input.display()))?;
            for warning in &unit.warnings {
                warn!("{}: {warning}", input.display());
            }
            let output = output
                .clone()
                .unwrap_or_else(|| input.with_extension("ob"));
            std::fs::write(&output, &unit.bytes)
                .wrap_err_with(|| format!("writing {}", output.display()))?;
            info!(
                "{} -> {} ({} bytes of code)",
                input.display(),
                output.display(),
                unit.header.code_size
            );
        }
        Command::Decompile {
            input,
            name,
            output,
        } => {
            let bytes = read(input)?;
            let name = name.clone().unwrap_or_else(|| proc_name(input));
            let text = decompile_with(&bytes, &name, &config.decompile)
                .wrap_err_with(|| format!("decompiling {}", input.display()))?;
            emit(output.as_deref(), &text)?;
        }
        Command::Disasm { input } => {
            let listing = disassemble(&read(input)?)
                .wrap_err_with(|| format!("disassembling {}", input.display()))?;
            emit(None, &listing)?;
        }
        Command::Tokens { input } => {
            let source = String::from_utf8_lossy(&read(input)?).into_owned();
            let tokens = tokenize(&source)
                .wrap_err_with(|| format!("tokenizing {}", input.display()))?;
            for t in tokens {
                println!("{:>4} {:?} {t}", t.line, t.kind);
            }
        }
    }
    Ok(())
}
