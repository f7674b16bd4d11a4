use std::sync::Arc;
use std::{env, process};

use color_eyre::eyre::Result;
use magicstrip::*;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: magicstripd <id/mac address> | --fake";

/// One line of input
#[derive(Debug, PartialEq, Eq)]
enum Request {
    Toggle,
    Refresh,
    State,
    SetColor(i32, i32, i32),
    SetBrightness(i32),
    SetEffect(Option<String>),
    SetEffectSpeed(i32),
}

fn parse_number(value: &str) -> std::result::Result<i32, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", value.trim()))
}

/// Parses `command[:args]`
fn parse_request(line: &str) -> std::result::Result<Request, String> {
    let (command, args) = match line.trim().split_once(':') {
        Some((command, args)) => (command, Some(args)),
        None => (line.trim(), None),
    };

    match (command, args) {
        ("", _) => Err("No command given".to_string()),
        ("toggle" | "toggle_power", None) => Ok(Request::Toggle),
        ("refresh" | "update", None) => Ok(Request::Refresh),
        ("state", None) => Ok(Request::State),
        ("set_color", Some(args)) => {
            let rgb = args
                .split(',')
                .map(parse_number)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            match rgb[..] {
                [red, green, blue] => Ok(Request::SetColor(red, green, blue)),
                _ => Err("Invalid color format. Use R,G,B (e.g., 255,0,0 for red)".to_string()),
            }
        }
        ("set_brightness", Some(level)) => Ok(Request::SetBrightness(parse_number(level)?)),
        ("set_effect", Some(name)) if !name.trim().is_empty() => {
            Ok(Request::SetEffect(Some(name.trim().to_string())))
        }
        ("set_effect" | "clear_effect", _) => Ok(Request::SetEffect(None)),
        ("set_effect_speed", Some(speed)) => Ok(Request::SetEffectSpeed(parse_number(speed)?)),
        (other, _) => Err(format!("Unknown command: {other}")),
    }
}

async fn handle<T: Transport>(device: &MagicStripDevice<T>, request: Request) -> Result<()> {
    match request {
        Request::Toggle => device.toggle_power().await?,
        Request::Refresh => device.refresh_state().await?,
        Request::State => {}
        Request::SetColor(red, green, blue) => device.set_color(red, green, blue).await?,
        Request::SetBrightness(level) => device.set_brightness(level).await?,
        Request::SetEffect(name) => device.set_effect_name(name.as_deref()).await?,
        Request::SetEffectSpeed(speed) => device.set_effect_speed(speed).await?,
    }
    Ok(())
}

/// Mainloop: wait for user input, line by line
async fn serve<T: Transport>(device: &MagicStripDevice<T>) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            debug!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_request(&line) {
            Ok(Request::State) => println!("OK {}", device.state()),
            Ok(request) => match handle(device, request).await {
                Ok(()) => println!("OK"),
                Err(e) => {
                    warn!("{}", e);
                    println!("ERR {e}");
                }
            },
            Err(message) => println!("ERR {message}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("magicstrip=warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
    color_eyre::install()?;

    // Get a target id/mac address from command line arguments.
    let Some(target) = env::args().nth(1) else {
        eprintln!("{USAGE}");
        process::exit(1);
    };
    if target == "-h" || target == "--help" {
        eprintln!("{USAGE}");
        process::exit(0);
    }

    if target == "--fake" {
        let transport = Arc::new(FakeTransport::with_status("00:00:00:00:00:00", true, 255));
        let device = MagicStripDevice::create(transport, "HTZM".to_string(), None, DeviceConfig::default()).await?;
        println!("OK");
        return serve(&device).await;
    }

    let mut hub = MagicStripHub::new().await?;
    let device = hub
        .add_known_devices(&[target.as_str()])
        .await?
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(target))?;

    // Inform about successful initialization
    println!("OK");
    serve(&*device).await
}
