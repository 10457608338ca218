//! socksroute - local SOCKS proxy with runtime-configurable chaining

use std::path::PathBuf;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use socksroute::app::{Runtime, RuntimeConfig};
use socksroute::config::Config;
use socksroute::error::Result;

fn main() {
    let args = Args::parse();

    if args.version {
        print_version();
        return;
    }

    if args.gen_config {
        match serde_json::to_string_pretty(&Config::default()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to render config: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Load configuration before logging so the file can set the level
    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.no_interaction {
        config.interactive = false;
    }

    // Initialize logging; stdout belongs to the console
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if let Err(e) = run(config) {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Goodbye!");
}

fn run(config: Config) -> Result<()> {
    info!("socksroute v{} starting...", env!("CARGO_PKG_VERSION"));

    let runtime_config = RuntimeConfig::from_config(&config)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = rt.block_on(async {
        let runtime = Runtime::new(runtime_config)?;
        runtime.run().await
    });

    // A console read may still be parked on stdin
    rt.shutdown_background();
    result
}

/// Command line arguments
struct Args {
    listen: Option<String>,
    config: Option<PathBuf>,
    no_interaction: bool,
    gen_config: bool,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut listen = None;
        let mut config = None;
        let mut no_interaction = false;
        let mut gen_config = false;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "-n" | "--no-interaction" => no_interaction = true,
                "--gen-config" => gen_config = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && listen.is_none() => {
                    // Positional argument: listen socket
                    listen = Some(arg.to_string());
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(2);
                }
            }
            i += 1;
        }

        Self {
            listen,
            config,
            no_interaction,
            gen_config,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"socksroute - local SOCKS proxy with runtime-configurable chaining

USAGE:
    socksroute [OPTIONS] [SOCKET]

ARGS:
    <SOCKET>                Listen endpoint [default: socks://localhost:9050]
                            "*" as host listens on every interface

OPTIONS:
    -n, --no-interaction    Do not read commands from stdin
    -c, --config <FILE>     Path to configuration file
    --gen-config            Print the default configuration
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    socksroute 1080
    socksroute socks5://alice:secret@*:1080 -n
    socksroute -c socksroute.json

CONSOLE:
    via socks5://hop:1080 example.com     chain example.com through hop
    via reject * 25                       refuse port 25
    via list                              show routes
    help                                  all commands
"#
    );
}

fn print_version() {
    println!("socksroute v{}", env!("CARGO_PKG_VERSION"));
    println!("Local SOCKS proxy with runtime-configurable chaining");
}
