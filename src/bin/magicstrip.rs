use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use magicstrip::device::DEFAULT_EFFECT_SPEED;
use magicstrip::*;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device address; scans for the first compatible strip when omitted
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// How long to scan for devices, in seconds
    #[arg(long, default_value_t = 10, global = true)]
    scan_secs: u64,

    /// Minimum delay between commands, in milliseconds
    #[arg(long, default_value_t = 0, global = true)]
    command_delay: u64,

    /// Talk to an in-memory strip instead of real hardware
    #[arg(long, global = true)]
    fake: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List compatible strips in range
    Discover,
    /// Read power and brightness
    Status,
    /// Toggle power
    Toggle,
    /// Set custom RGB color
    Color {
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: i32,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: i32,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: i32,
    },
    /// Set brightness
    Brightness {
        /// Brightness level (0-255)
        #[arg(short, long, default_value_t = 255)]
        level: i32,
    },
    /// Start a built-in effect (see `effects`)
    Effect {
        /// Effect name, e.g. "Breathing Red"
        name: String,
        /// Effect speed (0-255, 0 is fastest)
        #[arg(short, long, default_value_t = i32::from(DEFAULT_EFFECT_SPEED))]
        speed: i32,
    },
    /// Set the speed of the running effect
    Speed {
        /// Effect speed (0-255, 0 is fastest)
        speed: i32,
    },
    /// List built-in effects
    Effects,
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("magicstrip=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let command = cli.command.unwrap_or(Commands::Status);
    let config = DeviceConfig {
        command_delay: cli.command_delay,
        ..DeviceConfig::default()
    };

    if let Commands::Effects = command {
        for effect in EFFECTS.iter() {
            println!("{:#04x}  {}", effect.id, effect.name);
        }
        return Ok(());
    }

    if cli.fake {
        let address = cli.address.as_deref().unwrap_or("00:00:00:00:00:00");
        let transport = Arc::new(FakeTransport::with_status(address, true, 255));
        let device = MagicStripDevice::create(transport, "HTZM".to_string(), None, config).await?;
        return run(&device, command).await;
    }

    let mut hub = MagicStripHub::with_config(HubConfig {
        scan_duration: Duration::from_secs(cli.scan_secs),
        device: config,
        ..HubConfig::default()
    })
    .await?;

    if let Commands::Discover = command {
        let devices = hub.discover().await?;
        if devices.is_empty() {
            return Err(Error::NoCompatibleDevice.into());
        }
        for device in devices {
            println!("{}  {}  {}", device.address(), device.name(), device.state());
        }
        return Ok(());
    }

    let device = match cli.address {
        Some(address) => hub
            .add_known_devices(&[address.as_str()])
            .await?
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound(address))?,
        None => hub
            .discover()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoCompatibleDevice)?,
    };

    run(&*device, command).await
}

/// Runs a single device command and prints the resulting state
#[instrument(skip(device))]
async fn run<T: Transport>(device: &MagicStripDevice<T>, command: Commands) -> Result<()> {
    let result = match command {
        Commands::Status | Commands::Discover => device.refresh_state().await,
        Commands::Toggle => device.toggle_power().await,
        Commands::Color { red, green, blue } => device.set_color(red, green, blue).await,
        Commands::Brightness { level } => device.set_brightness(level).await,
        Commands::Effect { name, speed } => device.set_effect(&name, speed).await,
        Commands::Speed { speed } => device.set_effect_speed(speed).await,
        Commands::Effects => Ok(()),
    };

    if let Err(e) = result {
        error!("{}: {}", device.address(), e);
        return Err(e.into());
    }

    info!("{}: {}", device.address(), device.state());
    println!("{}", device.state());
    Ok(())
}
