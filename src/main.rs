use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use env_logger::{Env, Target, WriteStyle};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use traffic_analyzer::{
    app::App,
    settings::{Config, GeneratorConfig, LoggingConfig, ReceiverConfig},
    traffic::{TrafficGenerator, TrafficReceiver},
    utils::formatting::{format_bytes, format_elapsed},
};

#[derive(Parser)]
#[command(name = "traffic-analyzer")]
#[command(about = "UDP network load tester with delay, loss and throughput statistics")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, global = true, help = "Write logs to this file")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive terminal UI (default)
    Ui,

    /// Send probe traffic without the UI
    Send {
        #[arg(long, help = "Destination host")]
        host: Option<String>,

        #[arg(short, long, help = "Destination port")]
        port: Option<u16>,

        #[arg(short = 'n', long, help = "Number of packets")]
        count: Option<u64>,

        #[arg(short, long, help = "Packet size in bytes (minimum 16)")]
        size: Option<usize>,

        #[arg(short, long, help = "Packets per second, 0 for no pacing")]
        rate: Option<u32>,
    },

    /// Receive probe traffic and print statistics on exit
    Receive {
        #[arg(short, long, help = "Port to listen on")]
        port: Option<u16>,

        #[arg(short, long, help = "Local IP address to bind")]
        bind: Option<String>,

        #[arg(short = 't', long, help = "Stop after this many seconds instead of waiting for Ctrl-C")]
        duration: Option<u64>,

        #[arg(long, help = "Print statistics as JSON")]
        json: bool,
    },

    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,

        #[arg(short, long, help = "Overwrite an existing file")]
        force: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if cli.log_file.is_some() {
        config.logging.file = cli.log_file.clone();
    }
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    let command = cli.command.unwrap_or(Command::Ui);
    init_logging(&config.logging, matches!(command, Command::Ui))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start async runtime")?;

    match command {
        Command::Ui => {
            let mut app = App::new(config, runtime.handle().clone());
            app.run()?;
            println!("Network load tester stopped.");
        }
        Command::Send { host, port, count, size, rate } => {
            let defaults = config.generator;
            let generator = GeneratorConfig {
                host: host.unwrap_or(defaults.host),
                port: port.unwrap_or(defaults.port),
                packet_count: count.unwrap_or(defaults.packet_count),
                packet_size: size.unwrap_or(defaults.packet_size),
                frequency: rate.unwrap_or(defaults.frequency),
            };
            send(&runtime, generator)?;
        }
        Command::Receive { port, bind, duration, json } => {
            let defaults = config.receiver;
            let receiver = ReceiverConfig {
                bind_addr: bind.unwrap_or(defaults.bind_addr),
                port: port.unwrap_or(defaults.port),
                stop_grace_ms: defaults.stop_grace_ms,
            };
            receive(&runtime, receiver, duration.map(Duration::from_secs), json)?;
        }
        Command::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

/// The UI owns the terminal, so without a log file it logs to its own pane only.
fn init_logging(logging: &LoggingConfig, interactive: bool) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(logging.level.as_str()));

    match logging.file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            builder.target(Target::Pipe(Box::new(file)));
            builder.write_style(WriteStyle::Never);
        }
        None if interactive => return Ok(()),
        None => {
            builder.target(Target::Stderr);
        }
    }

    builder.init();
    Ok(())
}

fn send(runtime: &Runtime, config: GeneratorConfig) -> anyhow::Result<()> {
    println!("Starting generator: {}:{}", config.host, config.port);
    let generator = TrafficGenerator::new(config)?;

    let summary = runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let run = generator.run(shutdown_rx);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                let _ = shutdown_tx.send(()).await;
                run.await
            }
        }
    })?;

    println!(
        "Sent {} packets ({}) to {} in {}",
        summary.packets_sent,
        format_bytes(summary.bytes_sent),
        summary.target,
        format_elapsed(summary.elapsed)
    );
    if summary.cancelled {
        println!("Generator cancelled.");
    } else {
        println!("Generator finished.");
    }
    Ok(())
}

fn receive(runtime: &Runtime, config: ReceiverConfig, duration: Option<Duration>, json: bool) -> anyhow::Result<()> {
    let grace = config.stop_grace();

    let stats = runtime.block_on(async {
        let handle = TrafficReceiver::start(&config).await?;
        eprintln!("Receiver listening on {}. Press Ctrl-C to stop.", handle.local_addr());

        match duration {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            None => tokio::signal::ctrl_c().await.context("Cannot listen for Ctrl-C")?,
        }

        eprintln!("Stopping receiver...");
        anyhow::Ok(handle.stop(grace).await)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        match stats {
            Some(stats) => {
                for line in stats.report_lines() {
                    println!("{}", line);
                }
            }
            None => println!("Stats: No packets received."),
        }
    }
    Ok(())
}
