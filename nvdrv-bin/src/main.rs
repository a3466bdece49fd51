//! Command-line interface for nvdrv

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use serde::Serialize;

use nvdrv::devices::ctrl::{SYNCPOINT_CLEAR_EVENT_WAIT, SYNCPOINT_WAIT_EVENT};
use nvdrv::devices::{Device, EventState, SyncpointEventValue};
use nvdrv::prelude::*;

#[derive(Parser)]
#[command(name = "nvdrv")]
#[command(version = nvdrv::VERSION)]
#[command(about = "Inspect and exercise the emulated nvdrv ioctl interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output verbosity
    #[arg(short, long, value_enum, default_value_t = Verbosity::Normal)]
    verbosity: Verbosity,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack a raw ioctl number
    Decode {
        /// Raw command, decimal or 0x-prefixed hex
        raw: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Pack descriptor fields into a raw ioctl number
    Encode {
        /// Argument buffer size
        #[arg(short, long, value_parser = parse_u32)]
        size: u32,

        /// Driver magic
        #[arg(short, long, value_parser = parse_u32)]
        magic: u32,

        /// Function number
        #[arg(short, long, value_parser = parse_u32)]
        function: u32,

        /// The guest writes the buffer
        #[arg(long)]
        input: bool,

        /// The driver writes the buffer
        #[arg(long)]
        output: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List device paths and their capability gates
    Devices {
        /// Session permission bits, defaults to the application service
        #[arg(short, long, value_parser = parse_u32)]
        perms: Option<u32>,

        /// Gate /dev/nvhost-ctrl behind the GPU capability
        #[arg(long)]
        gated_ctrl: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run a scripted syncpoint wait against the software host1x
    Simulate {
        /// Syncpoint to wait on
        #[arg(long, default_value_t = 3)]
        syncpoint: u32,

        /// Fence threshold
        #[arg(long, default_value_t = 10)]
        threshold: u32,

        /// Value the syncpoint starts at
        #[arg(long, default_value_t = 5)]
        start: u32,

        /// Number of single increments to perform
        #[arg(long, default_value_t = 6)]
        increments: u32,

        /// Cancel the wait after this many increments
        #[arg(long)]
        cancel_after: Option<u32>,

        /// JSON driver configuration
        #[arg(long, env = "NVDRV_CONFIG")]
        config: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Minimal,
    Normal,
    Detailed,
    Debug,
}

impl Verbosity {
    fn level(self) -> LevelFilter {
        match self {
            Verbosity::Minimal => LevelFilter::Error,
            Verbosity::Normal => LevelFilter::Warn,
            Verbosity::Detailed => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid number '{}': {}", value, err))
}

#[derive(Serialize)]
struct DescriptorReport {
    raw: String,
    direction: &'static str,
    #[serde(flatten)]
    descriptor: IoctlDescriptor,
}

impl From<IoctlDescriptor> for DescriptorReport {
    fn from(descriptor: IoctlDescriptor) -> Self {
        Self {
            raw: format!("0x{:08X}", descriptor.raw()),
            direction: descriptor.direction(),
            descriptor,
        }
    }
}

#[derive(Serialize)]
struct DeviceRow {
    path: &'static str,
    requires: Vec<&'static str>,
    permitted: bool,
}

#[derive(Serialize)]
struct SimulationStep {
    increment: u32,
    syncpoint_value: u32,
    signalled: bool,
    state: Option<EventState>,
}

#[derive(Serialize)]
struct SimulationReport {
    fence: Fence,
    wait_result: NvResult,
    event_value: String,
    steps: Vec<SimulationStep>,
    cancel_result: Option<NvResult>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbosity.level())
        .parse_default_env()
        .init();

    match &cli.command {
        Commands::Decode { raw, format } => {
            let raw = parse_u32(raw).map_err(anyhow::Error::msg)?;
            print_descriptor(IoctlDescriptor::from_raw(raw), *format)?;
        }

        Commands::Encode {
            size,
            magic,
            function,
            input,
            output,
            format,
        } => {
            if *size > 0x3FFF {
                bail!("size 0x{:X} does not fit in 14 bits", size);
            }
            let magic = u8::try_from(*magic).context("magic must fit in a byte")?;
            let function = u8::try_from(*function).context("function must fit in a byte")?;
            let descriptor =
                IoctlDescriptor::new(*input, *output, *size as u16, magic as i8, function);
            print_descriptor(descriptor, *format)?;
        }

        Commands::Devices {
            perms,
            gated_ctrl,
            format,
        } => {
            let config = if *gated_ctrl {
                DriverConfig::gated_ctrl()
            } else {
                DriverConfig::default()
            };
            let ctx = match perms {
                Some(bits) => SessionContext::new(SessionPermissions::from_bits_truncate(*bits)),
                None => SessionContext::application(),
            };
            print_devices(&config, &ctx, *format)?;
        }

        Commands::Simulate {
            syncpoint,
            threshold,
            start,
            increments,
            cancel_after,
            config,
            format,
        } => {
            let config = match config {
                Some(path) => DriverConfig::from_json_file(path)
                    .with_context(|| format!("loading configuration from {}", path))?,
                None => DriverConfig::default(),
            };
            let report = simulate(
                config,
                Fence::new(*syncpoint, *threshold),
                *start,
                *increments,
                *cancel_after,
            )?;
            match format {
                OutputFormat::Text => print_simulation_text(&report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }

        Commands::Version => {
            println!("nvdrv v{}", nvdrv::version());
            println!("High-level emulation of the nvdrv ioctl interface");
        }
    }

    Ok(())
}

fn print_descriptor(descriptor: IoctlDescriptor, format: OutputFormat) -> Result<()> {
    let report = DescriptorReport::from(descriptor);
    match format {
        OutputFormat::Text => {
            println!("Raw:       {}", report.raw);
            println!("Direction: {}", report.direction);
            println!("Size:      0x{:X}", descriptor.size);
            println!("Magic:     0x{:02X}", descriptor.magic as u8);
            println!("Function:  0x{:02X}", descriptor.function);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_devices(config: &DriverConfig, ctx: &SessionContext, format: OutputFormat) -> Result<()> {
    let rows: Vec<DeviceRow> = DeviceClass::ALL
        .into_iter()
        .map(|class| DeviceRow {
            path: class.path(),
            requires: class
                .required_permission(config)
                .map(|perm| perm.iter_names().map(|(name, _)| name).collect())
                .unwrap_or_default(),
            permitted: class.is_permitted(config, ctx),
        })
        .collect();

    match format {
        OutputFormat::Text => {
            println!("Device paths (permissions 0x{:X}):", ctx.perms.bits());
            for row in &rows {
                let gate = if row.requires.is_empty() {
                    "-".to_string()
                } else {
                    row.requires.join("|")
                };
                let mark = if row.permitted { "✅" } else { "❌" };
                println!("  {} {:<24} {}", mark, row.path, gate);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

fn simulate(
    config: DriverConfig,
    fence: Fence,
    start: u32,
    increments: u32,
    cancel_after: Option<u32>,
) -> Result<SimulationReport> {
    let host1x = Arc::new(SoftHost1x::new(config.syncpoint_count));
    host1x.increment_by(fence.id, start);

    let service = NvDrvService::new(config, host1x.clone(), SessionContext::application());
    let (fd, result) = service.open("/dev/nvhost-ctrl");
    if result != NvResult::Success {
        bail!("opening /dev/nvhost-ctrl failed: {}", result);
    }

    let mut input = [0u8; 0x10];
    fence.encode(&mut input[0..8]);
    (-1i32).encode(&mut input[8..12]);
    let mut output = [0u8; 0x10];
    let wait_result = service.ioctl(fd, SYNCPOINT_WAIT_EVENT, Some(&input[..]), Some(&mut output[..]))?;
    let value = SyncpointEventValue::decode(&output[12..16]);

    let mut report = SimulationReport {
        fence,
        wait_result,
        event_value: format!("0x{:08X}", value.raw()),
        steps: Vec::new(),
        cancel_result: None,
    };
    if wait_result != NvResult::Timeout {
        return Ok(report);
    }

    let (_, event) = service.query_event(fd, value.raw())?;
    let device = service.driver().get_device(fd)?;
    let slot = value.partial_slot() as usize;
    let state = || match device.as_ref() {
        Device::Ctrl(ctrl) => ctrl.events().state(slot),
        _ => None,
    };

    for increment in 1..=increments {
        if cancel_after == Some(increment - 1) {
            let mut buffer = value.slot().to_le_bytes();
            let result = service.ioctl(
                fd,
                SYNCPOINT_CLEAR_EVENT_WAIT,
                Some(&value.slot().to_le_bytes()[..]),
                Some(&mut buffer[..]),
            )?;
            report.cancel_result = Some(result);
        }

        let syncpoint_value = host1x.increment(fence.id);
        report.steps.push(SimulationStep {
            increment,
            syncpoint_value,
            signalled: event.as_ref().is_some_and(|event| event.is_signalled()),
            state: state(),
        });
    }

    service.close(fd);
    Ok(report)
}

fn print_simulation_text(report: &SimulationReport) {
    println!("📊 Syncpoint wait simulation");
    println!("============================");
    println!("Fence: id {} value {}", report.fence.id, report.fence.value);
    println!("Wait result: {}", report.wait_result);
    println!("Event value: {}", report.event_value);
    if let Some(result) = report.cancel_result {
        println!("Cancel result: {}", result);
    }

    for step in &report.steps {
        let state = step
            .state
            .map_or_else(|| "-".to_string(), |state| format!("{:?}", state));
        println!(
            "  +{:<3} value {:<6} signalled {:<5} state {}",
            step.increment, step.syncpoint_value, step.signalled, state
        );
    }
}
