use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;
use tokio::io::BufReader;

use dz_route_map::cities::{find_city, CITIES};
use dz_route_map::config::AppConfig;
use dz_route_map::errors::{Error, ErrorKind, Result};
use dz_route_map::etl::cache::OsmCache;
use dz_route_map::etl::provider::{FileProvider, MapProvider, OverpassProvider};
use dz_route_map::etl::CityEtl;
use dz_route_map::render::Renderer;
use dz_route_map::session::{LoadOutcome, Session};
use dz_route_map::shell::{Shell, ShellCommand};

#[derive(Parser)]
#[command(name = "dz-route-map")]
#[command(about = "Shortest driving routes between intersections of Algerian cities", long_about = None)]
struct Cli {
    /// JSON config file; every field is optional.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Read `<city>.osm[.xz]` files from this directory instead of the network.
    #[arg(long)]
    offline_dir: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive prompt (the default)
    Shell,
    /// List the supported cities
    Cities,
    /// Load a city and list its intersections
    Nodes {
        #[arg(long)]
        city: String,
        /// Only show labels or ids containing this text
        #[arg(long, default_value = "")]
        filter: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Load a city, find the shortest path and write the map
    Route {
        #[arg(long)]
        city: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Remove the cached download of a city
    Clean {
        #[arg(long)]
        city: String,
    },
}

fn setup_logging(level: &str) {
    // stdout belongs to the shell
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stderr()))
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(Command::Nodes { limit: Some(limit), .. }) = &cli.command {
        config.list_limit = *limit;
    }
    if let Some(Command::Route { output: Some(output), .. }) = &cli.command {
        config.output_path = output.clone();
    }
    Ok(config)
}

fn resolve_city(name: &str) -> Result<&'static str> {
    find_city(name).ok_or_else(|| Error::new(ErrorKind::Other, format!("Unknown city '{}'", name)))
}

async fn load_city<P: MapProvider + 'static>(shell: &mut Shell<P, io::Stdout>, city: &str) -> Result<()> {
    shell.execute(ShellCommand::City(resolve_city(city)?.to_string()))?;
    match shell.wait_for_load().await? {
        LoadOutcome::Failed { city, message } => {
            Err(Error::provider(format!("Could not load {}: {}", city, message)))
        },
        _ => Ok(()),
    }
}

async fn run<P: MapProvider + 'static>(cli: Cli, config: AppConfig, provider: P) -> Result<()> {
    let cache = config.use_cache.then(|| OsmCache::new(&config.cache_dir));
    let etl = Arc::new(CityEtl::new(Arc::new(provider), cache, &config.country_suffix, config.retain_all));

    match cli.command.unwrap_or(Command::Shell) {
        Command::Cities => {
            for city in CITIES {
                println!("{}", city);
            }
            return Ok(());
        },
        Command::Clean { city } => {
            let city = resolve_city(&city)?;
            if etl.clean(city)? {
                println!("Removed cached map of {}", city);
            } else {
                println!("Nothing cached for {}", city);
            }
            return Ok(());
        },
        command => {
            let session = Session::new(Renderer::new(&config));
            let mut shell = Shell::new(session, etl, config.output_path.clone(), config.list_limit, io::stdout());
            match command {
                Command::Nodes { city, filter, .. } => {
                    load_city(&mut shell, &city).await?;
                    shell.execute(ShellCommand::Nodes(filter))?;
                },
                Command::Route { city, source, target, .. } => {
                    load_city(&mut shell, &city).await?;
                    shell.execute(ShellCommand::Source(source.parse()?))?;
                    shell.execute(ShellCommand::Target(target.parse()?))?;
                    shell.execute(ShellCommand::Find)?;
                },
                _ => shell.run(BufReader::new(tokio::io::stdin())).await?,
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    setup_logging(&config.log_level);

    match cli.offline_dir.clone() {
        Some(dir) => {
            info!(dir = dir.display().to_string(); "Using offline maps");
            run(cli, config, FileProvider::new(dir)).await
        },
        None => {
            let provider = OverpassProvider::new(&config)?;
            run(cli, config, provider).await
        },
    }
}
