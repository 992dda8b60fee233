use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::rover::{self, RoverConfig, ServeArgs};

/// Control and telemetry server for the field rover.
#[derive(Debug, Parser)]
#[command(name = "rover", version, about, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Serve flags, accepted without the `serve` keyword as well.
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve(ServeArgs),
    /// Print available serial ports and cameras, then exit.
    Devices(DevicesArgs),
}

#[derive(Debug, Args)]
struct DevicesArgs {
    /// Number of camera indices to probe.
    #[arg(long = "camera-probe", default_value_t = 5)]
    camera_probe: i32,
    /// I2C character device hosting the inertial sensor.
    #[arg(long = "i2c-bus", env = "ROVER_I2C_BUS", default_value = "/dev/i2c-1")]
    i2c_bus: String,
    /// I2C address of the inertial sensor (hex with 0x prefix, or decimal).
    #[arg(long = "imu-address", default_value = "0x68", value_parser = rover::parse_address)]
    imu_address: u16,
}

pub fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Command::Serve(cli.serve)) {
        Command::Serve(args) => {
            let config = RoverConfig::try_from(args)?;
            rover::init_tracing(config.verbose);
            rover::run(config)
        }
        Command::Devices(args) => {
            rover::init_tracing(false);
            rover::list_devices(args.camera_probe.max(0), &args.i2c_bus, args.imu_address)
        }
    }
}
