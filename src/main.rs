//! luahost - CLI

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use luahost::util::config::load_config;
use luahost::util::logger::{self, LogLevel};
use luahost::{BridgeConfig, Interpreter, NAME, VERSION};

/// Run Lua scripts in an embedded interpreter
#[derive(Parser, Debug)]
#[command(name = "luahost")]
#[command(version = VERSION)]
#[command(about = "Run Lua scripts in an embedded interpreter", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.config/luahost/config.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Make a module available to require(): NAME=PATH
    #[arg(long, global = true, value_name = "NAME=PATH")]
    preload: Vec<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a Lua source or bytecode file
    Run {
        /// Script to run
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Evaluate Lua code from the command line
    Eval {
        /// Code to evaluate
        #[arg(value_name = "CODE")]
        code: String,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    logger::init_with_level(if args.verbose {
        LogLevel::Debug
    } else {
        config.log.level
    });

    match args.command {
        Commands::Run { file } => {
            let lua = build_interpreter(config.bridge, &args.preload)?;
            let count = lua
                .exec_file(&file)
                .with_context(|| format!("Failed to run: {}", file.display()))?;
            let top = lua.top();
            for idx in top - count + 1..=top {
                println!("{}", lua.value_at(idx));
            }
        }
        Commands::Eval { code } => {
            let lua = build_interpreter(config.bridge, &args.preload)?;
            for value in lua.eval(&code).context("Failed to evaluate code")? {
                println!("{}", value);
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn build_interpreter(
    config: BridgeConfig,
    preload: &[String],
) -> Result<Interpreter> {
    let lua = Interpreter::with_config(config)?;
    lua.register("host_version", |ctx| {
        ctx.push_string(VERSION);
        Ok(1)
    })?;

    for entry in preload {
        let (name, path) = parse_preload(entry)?;
        lua.preload_module_file(name, path)
            .with_context(|| format!("Failed to preload module {}", name))?;
    }
    Ok(lua)
}

fn parse_preload(entry: &str) -> Result<(&str, &Path)> {
    let (name, path) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=PATH, got {:?}", entry))?;
    if name.is_empty() || path.is_empty() {
        return Err(anyhow!("expected NAME=PATH, got {:?}", entry));
    }
    Ok((name, Path::new(path)))
}
