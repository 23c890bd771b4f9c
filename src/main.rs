use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use radiacode_reader::report::render_report;
use radiacode_reader::{DeviceSession, SessionConfig};

/// Print one reading from a RadiaCode detector
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Bluetooth MAC address of the device (e.g. 00:11:22:33:44:55)
    #[arg(long)]
    bluetooth_mac: Option<String>,

    /// USB serial number of the device (e.g. "RC-10x-xxxxxx")
    #[arg(long)]
    serial: Option<String>,

    /// Print the full sample timestamp instead of HH:MM
    #[arg(long)]
    full_time: bool,
}

async fn run(args: Args) -> radiacode_reader::Result<()> {
    let config = SessionConfig::new(args.bluetooth_mac, args.serial)?;

    let mut session = DeviceSession::connect(&config).await?;
    let result = session.fetch_snapshot().await;
    session.close();

    let snapshot = result?;
    print!("{}", render_report(&snapshot, args.full_time));
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    match run(args).await {
        Ok(()) => {
            info!("Reading completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
