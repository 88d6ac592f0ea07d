//! Cherry MX Board 3.0 S RGB CLI tool
//!
//! Lighting is configured through a 64 byte HID SET_REPORT control transfer on
//! interface 1 of the keyboard.

use std::ffi::OsString;
use std::num::ParseIntError;
use std::process;

use clap::error::ErrorKind;
use clap::{
    crate_description, crate_name, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command,
};
use rusb::{GlobalContext, LogLevel, UsbContext};
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cherry_mx_board_3_0s::{CherryMxBoard3S, PayloadRevision};
use crate::controller::{DeviceIdentity, LightingController};
use crate::error::Error;
use crate::lighting::{Brightness, Lighting, LightingMode, Speed};

mod cherry_mx_board_3_0s;
mod controller;
mod device;
mod error;
mod lighting;

/// New lighting config.
#[derive(PartialEq, Eq, Debug)]
struct Config {
    lighting: Lighting,
    identity: DeviceIdentity,
    revision: PayloadRevision,
    verbose: bool,
}

impl Config {
    fn from_cli(matches: &ArgMatches, default_identity: DeviceIdentity) -> Self {
        let mut config = Config {
            lighting: Lighting::default(),
            identity: default_identity,
            revision: PayloadRevision::default(),
            verbose: matches.get_flag("verbose"),
        };

        let color = &mut config.lighting.color;
        replace_from_arg(&mut color.r, matches, "red");
        replace_from_arg(&mut color.g, matches, "green");
        replace_from_arg(&mut color.b, matches, "blue");

        if let Some(mode) = matches.get_one::<String>("lighting") {
            config.lighting.mode = LightingMode::from_name(mode);
        }

        if let Some(speed) = matches.get_one::<u64>("speed") {
            config.lighting.speed = Speed::new(*speed);
        }

        if let Some(brightness) = matches.get_one::<i64>("brightness") {
            config.lighting.brightness = Brightness::new(*brightness);
        }

        config.lighting.random_colors = matches.get_flag("random-colors");

        replace_from_arg(&mut config.identity.vendor_id, matches, "vendor-id");
        replace_from_arg(&mut config.identity.product_id, matches, "product-id");

        if matches.get_flag("legacy-payload") {
            config.revision = PayloadRevision::Legacy;
        }

        config
    }
}

/// Result of command line parsing.
#[derive(Debug)]
enum Invocation {
    Apply(Config),
    Help,
    Version,
    Invalid(clap::Error),
}

fn main() {
    let controller = CherryMxBoard3S::new(PayloadRevision::default());

    let config = match parse_cli(std::env::args_os(), controller.identity()) {
        Invocation::Apply(config) => config,
        Invocation::Help => {
            let _ = cli().print_help();
            return;
        },
        Invocation::Version => {
            println!("{}", crate_version!());
            return;
        },
        Invocation::Invalid(err) => {
            let _ = err.print();
            println!();
            let _ = cli().print_help();
            process::exit(1);
        },
    };

    init_logging(config.verbose);

    if let Err(err) = set_lighting(&config) {
        match report_level(&err) {
            Report::Abort => {
                error!("{} - Abort.", err);
                process::exit(1);
            },
            Report::Warn => warn!("{}", err),
            Report::Info => info!("{}", err),
        }
    }
}

/// Log level of a failed command.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
enum Report {
    Abort,
    Warn,
    Info,
}

fn report_level(err: &Error) -> Report {
    match err {
        Error::UnsupportedMode(_) => Report::Warn,
        err if err.is_fatal() => Report::Abort,
        _ => Report::Info,
    }
}

/// Write a config to the USB bus.
fn set_lighting(config: &Config) -> Result<(), Error> {
    let controller = CherryMxBoard3S::new(config.revision);

    // Encode before touching the device, unsupported modes are a no-op.
    let payload = controller.lighting_bytes(&config.lighting)?;

    debug!(lighting = ?config.lighting, "encoded payload {:02x?}", &payload[..]);

    let keyboard = device::select(config.identity)?;
    device::apply(keyboard, controller.control_setup(), &payload)
}

/// Set up timestamped console logging.
fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder().with_default_directive(level.into()).from_env_lossy(),
        )
        .init();

    // Forward libusb's own debug output.
    if verbose {
        GlobalContext::default().set_log_level(LogLevel::Debug);
    }
}

/// Parse command line arguments.
fn parse_cli<I, T>(args: I, default_identity: DeviceIdentity) -> Invocation
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();

    // Print usage when started without any options.
    if args.len() <= 1 {
        return Invocation::Help;
    }

    match cli().try_get_matches_from(args) {
        Ok(matches) => Invocation::Apply(Config::from_cli(&matches, default_identity)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp => Invocation::Help,
            ErrorKind::DisplayVersion => Invocation::Version,
            _ => Invocation::Invalid(err),
        },
    }
}

/// Get clap CLI parameters.
fn cli() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .after_help(
            "Changing the lighting requires root permissions, otherwise install a udev rule for \
             the keyboard.",
        )
        .arg(
            Arg::new("red")
                .help("Red value of the lighting color [possible values: 0..=255]")
                .long("red")
                .value_parser(value_parser!(u8)),
        )
        .arg(
            Arg::new("green")
                .help("Green value of the lighting color [possible values: 0..=255]")
                .long("green")
                .value_parser(value_parser!(u8)),
        )
        .arg(
            Arg::new("blue")
                .help("Blue value of the lighting color [possible values: 0..=255]")
                .long("blue")
                .value_parser(value_parser!(u8)),
        )
        .arg(
            Arg::new("lighting")
                .help(
                    "Lighting effect [possible values: wave, spectrum, breathing, rolling, curve, \
                     scan, custom, radiation, ripples, single_key, static]",
                )
                .long("lighting")
                .short('l'),
        )
        .arg(
            Arg::new("speed")
                .help("Effect speed, from 0 (fastest) to 4 (slowest)")
                .long("speed")
                .short('s')
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("brightness")
                .help("LED brightness [possible values: 1..=4]")
                .long("brightness")
                .short('b')
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64)),
        )
        .arg(
            Arg::new("random-colors")
                .help("Use random colors if the effect supports them, ignoring RGB values")
                .long("random-colors")
                .short('r')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("vendor-id")
                .help("Hexadecimal USB vendor ID of the keyboard")
                .long("vendor-id")
                .value_parser(parse_hex_id),
        )
        .arg(
            Arg::new("product-id")
                .help("Hexadecimal USB product ID of the keyboard")
                .long("product-id")
                .value_parser(parse_hex_id),
        )
        .arg(
            Arg::new("legacy-payload")
                .help("Send a constant brightness byte, as older firmware revisions expect")
                .long("legacy-payload")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .help("Verbose output, including libusb debug messages")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue),
        )
}

/// Parse a hexadecimal USB ID with an optional `0x` prefix.
fn parse_hex_id(value: &str) -> Result<u16, ParseIntError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u16::from_str_radix(digits, 16)
}

/// Replace config value with the CLI parameter if it is present.
#[inline]
fn replace_from_arg<T>(option: &mut T, matches: &ArgMatches, name: &str)
where
    T: Copy + Send + Sync + 'static,
{
    if let Some(value) = matches.get_one::<T>(name) {
        *option = *value;
    }
}
