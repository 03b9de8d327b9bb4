// src/main.rs
//! gps-provider - serial NMEA session monitor

use clap::Parser;
use gps_provider::{
    config::GpsConfig, GpsCallbacks, GpsFix, GpsSession, Result, SvStatus,
};
use log::warn;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "gps-provider", about = "Serial NMEA GPS session monitor")]
struct Args {
    /// Serial device path
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Fix delivery interval in seconds
    #[arg(short, long)]
    interval: Option<i64>,

    /// Persist the effective settings for next time
    #[arg(long)]
    save: bool,
}

/// Prints every delivered update to stdout.
struct ConsoleCallbacks;

impl GpsCallbacks for ConsoleCallbacks {
    fn on_location(&self, fix: &GpsFix) {
        println!(
            "fix: lat={:.6} lon={:.6} alt={:.1} speed={:.2} bearing={:.1} acc={:.2} ts={} flags={:#x}",
            fix.latitude,
            fix.longitude,
            fix.altitude,
            fix.speed,
            fix.bearing,
            fix.accuracy,
            fix.timestamp_ms,
            fix.flags.bits()
        );
    }

    fn on_sv_status(&self, status: &SvStatus) {
        println!(
            "satellites: {} visible, used mask {:#010x}",
            status.num_svs(),
            status.used_in_fix_mask
        );
    }

    fn on_session_begin(&self) {
        println!("session started");
    }

    fn on_session_end(&self) {
        println!("session ended");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = GpsConfig::load().unwrap_or_default();
    if let Some(port) = args.port {
        config.serial_port = port;
    }
    if let Some(baud) = args.baud {
        config.serial_baudrate = baud;
    }
    if let Some(interval) = args.interval {
        config.update_fix_interval(interval);
    }
    if args.save {
        config.save()?;
    }

    println!(
        "Connecting to GPS on {} at {} baud...",
        config.serial_port, config.serial_baudrate
    );

    let mut session = GpsSession::new();
    session.init_serial(
        &config.serial_port,
        config.serial_baudrate,
        Arc::new(ConsoleCallbacks),
    )?;
    session.set_fix_interval(config.fix_interval)?;
    session.start().await?;

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");

    // the device may have hung up during the run, taking the worker with
    // it; a failed stop must not skip cleanup
    if let Err(e) = session.stop().await {
        warn!("stop failed: {}", e);
    }
    session.cleanup().await?;
    Ok(())
}
