use clap::Parser;
use psx_harvest::{bootstrap, obs, Command};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "psx-harvest")]
#[command(about = "Scheduled PSX market-watch harvester.", version)]
struct Cli {
    /// Config file path (TOML). If omitted, uses env PSX_CONFIG, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();

    let config_path = bootstrap::resolve_config_path(cli.config);
    let config = match bootstrap::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = obs::init_tracing(&config.logging.level, &config.logging.format) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to init tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    let metrics_addr = std::env::var(obs::METRICS_ADDR_ENV).ok();
    let metrics = {
        let _guard = runtime.enter();
        obs::init_metrics(metrics_addr.as_deref())
    };
    if let Err(err) = metrics {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    match runtime.block_on(psx_harvest::execute(cli.command, config)) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
