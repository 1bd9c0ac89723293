use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use garnet::{Interp, RuntimeConfig};

#[derive(Parser)]
#[command(name = "garnet")]
#[command(about = "An embeddable Ruby-like dynamic language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a garnet source file
    Run {
        /// The source file to run
        file: Option<PathBuf>,

        /// Arguments to pass to the script as ARGV
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        script_args: Vec<String>,

        /// Execute code directly from the command line
        #[arg(short = 'c', long)]
        code: Option<String>,

        /// Load runtime configuration from a TOML file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Extra directory consulted by require/load (repeatable)
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        include: Vec<String>,

        /// Print GC statistics after the run
        #[arg(long)]
        gc_stats: bool,

        /// Disable the garbage collector
        #[arg(long)]
        no_gc: bool,

        /// Allocations between collections
        #[arg(long, value_name = "N")]
        gc_threshold: Option<usize>,
    },
    /// Evaluate a code string and print its result
    Eval {
        /// The code to evaluate
        #[arg(short = 'c', long = "code")]
        code: String,
    },
    /// Compile a garnet source file without running it
    Check {
        /// The source file to check
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            script_args,
            code,
            config,
            include,
            gc_stats,
            no_gc,
            gc_threshold,
        } => {
            let mut config = match config {
                Some(path) => match RuntimeConfig::load(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("{}", e);
                        return ExitCode::FAILURE;
                    }
                },
                None => RuntimeConfig::default(),
            };
            config.gc_stats = config.gc_stats || gc_stats;
            if no_gc {
                config.gc_enabled = false;
            }
            if let Some(n) = gc_threshold {
                config.gc_threshold = n;
            }
            config.search_paths.extend(include);

            let (name, source) = match (code, file) {
                (Some(source), _) => ("<code>".to_string(), source),
                (None, Some(path)) => {
                    let source = match std::fs::read_to_string(&path) {
                        Ok(s) => s,
                        Err(e) => {
                            eprintln!("cannot read {}: {}", path.display(), e);
                            return ExitCode::FAILURE;
                        }
                    };
                    (path.to_string_lossy().to_string(), source)
                }
                (None, None) => {
                    eprintln!("no file specified");
                    return ExitCode::FAILURE;
                }
            };

            let mut interp = Interp::new(config);
            let argv: Vec<_> = script_args
                .into_iter()
                .map(|a| interp.str_value(a))
                .collect();
            let argv = interp.array_value(argv);
            interp.set_global("ARGV", argv);

            let print_stats = interp.config().gc_stats;
            let result = interp.eval(&name, &source);
            if print_stats {
                let stats = interp.gc_stats();
                eprintln!(
                    "gc: {} cycles, {} freed, {} live",
                    stats.cycles, stats.freed, stats.live
                );
            }
            if let Err(e) = result {
                eprintln!("{}", interp.format_error(&e));
                return ExitCode::FAILURE;
            }
        }
        Commands::Eval { code } => {
            let mut interp = Interp::new(RuntimeConfig::default());
            match interp.eval("<code>", &code) {
                Ok(v) => println!("{}", interp.inspect_value(v)),
                Err(e) => {
                    eprintln!("{}", interp.format_error(&e));
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Check { file } => {
            let source = match std::fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("cannot read {}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            let mut syms = garnet::vm::Interner::new();
            let name = file.to_string_lossy();
            if let Err(e) = garnet::compiler::compile(&name, &source, &mut syms) {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
