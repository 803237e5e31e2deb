use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use omr_grader::OmrConfig;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};

mod cmd;

#[derive(Parser, Debug)]
#[command(author, version, about = "Grade optical answer sheets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file with processing options; command-line flags override it
    #[arg(global = true, long = "config")]
    config_file: Option<PathBuf>,

    /// Directory of `<version>.json` answer keys
    #[arg(global = true, short = 'k', long, default_value = "keys")]
    keys_dir: PathBuf,

    #[arg(global = true, long, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Grade(cmd::grade::GradeArgs),
    Batch(cmd::batch::BatchArgs),
    CheckKey(cmd::keys::CheckKeyArgs),
    Sample(cmd::sample::SampleArgs),
}

/// Defaults, then the JSON file, then whatever was typed or exported.
fn resolve_config(file: Option<&PathBuf>, cli: &OmrConfig, matches: &ArgMatches) -> OmrConfig {
    let mut config = match file {
        Some(path) => {
            info!("📂 Loading options: {}", path.display());
            OmrConfig::load_from_file(path).unwrap_or_else(|e| {
                error!("❌ {}", e);
                process::exit(1);
            })
        }
        None => OmrConfig::default(),
    };
    config.merge_from_cli(cli, matches);
    config
}

fn main() {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let Some((_, sub_matches)) = matches.subcommand() else {
        error!("❌ No command given");
        process::exit(2);
    };

    let outcome = match cli.command {
        Commands::Grade(args) => {
            let config = resolve_config(cli.config_file.as_ref(), &args.config, sub_matches);
            cmd::grade::run(args, config, &cli.keys_dir)
        }
        Commands::Batch(args) => {
            let config = resolve_config(cli.config_file.as_ref(), &args.config, sub_matches);
            cmd::batch::run(args, config, &cli.keys_dir)
        }
        Commands::CheckKey(args) => cmd::keys::run(args),
        Commands::Sample(args) => cmd::sample::run(args, &cli.keys_dir),
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("❌ {}", e);
            process::exit(1);
        }
    }
}
