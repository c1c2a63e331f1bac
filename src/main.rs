use anyhow::Result;
use clap::Parser;
use rusb::Context;

use halfkay::device::DEFAULT_MCU;
use halfkay::{DeviceRef, Flashing, McuDb, McuProfile, locator};

#[derive(clap::Parser)]
#[clap(
    name = "HalfKay Loader CLI",
    about = "Program, reset and list Teensy boards over the HalfKay bootloader protocol"
)]
enum Cli {
    /// List attached boards, in application mode and bootloader mode
    List {},
    /// Soft-reboot the target into the bootloader, then jump straight back
    /// to the application
    Reset {
        /// Serial number(s) of the target, comma separated, or "all"
        #[clap(short, long)]
        device: Option<String>,
        /// Chip or board name of the target
        #[clap(short, long, default_value = DEFAULT_MCU)]
        mcu: String,
    },
    /// Download an Intel HEX image to code flash and boot it
    Program {
        /// The path of the firmware image
        path: String,
        /// Serial number(s) of the target, comma separated, or "all"
        #[clap(short, long)]
        device: Option<String>,
        /// Chip or board name of the target
        #[clap(short, long, default_value = DEFAULT_MCU)]
        mcu: String,
    },
}

fn main() -> Result<()> {
    let _ = simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let matches = Cli::parse();
    let ctx = Context::new()?;
    match matches {
        Cli::List {} => {
            list(&ctx)?;
        }
        Cli::Reset { device, mcu } => {
            let profile = McuDb::load()?.lookup(&mcu)?;
            for target in expand_device_arg(&ctx, device.as_deref(), false)? {
                reset(&ctx, profile.clone(), target)?;
            }
        }
        Cli::Program { path, device, mcu } => {
            let profile = McuDb::load()?.lookup(&mcu)?;
            let image = halfkay::format::read_firmware_from_file(&path, profile.code_size as usize)?;
            log::info!(
                "Firmware uses {} of {} bytes ({:.2}%)",
                image.high_water_mark(),
                profile.code_size,
                image.high_water_mark() as f64 / profile.code_size as f64 * 100.0
            );
            for target in expand_device_arg(&ctx, device.as_deref(), true)? {
                let mut flashing =
                    Flashing::new_from_usb(&ctx, profile.clone(), target.map(DeviceRef::BySerial))?;
                flashing.dump_info();
                flashing.program(&image)?;
                if !flashing.boot() {
                    log::warn!("Bootloader did not take the boot request");
                }
            }
        }
    }

    Ok(())
}

fn list(ctx: &Context) -> Result<()> {
    let queries = [
        ("application", locator::find_application_devices(ctx)?),
        ("bootloader", locator::find_bootloader_devices(ctx)?),
    ];
    for (label, devices) in queries {
        println!("Found {} {} mode device(s):", devices.len(), label);
        for serial in devices.keys() {
            println!("\t{serial}");
        }
    }
    Ok(())
}

fn reset(ctx: &Context, profile: McuProfile, target: Option<String>) -> Result<()> {
    let mut flashing = Flashing::new_from_usb(ctx, profile, target.map(DeviceRef::BySerial))?;
    if flashing.boot() {
        log::info!("Device reset");
    } else {
        log::warn!("Bootloader did not take the boot request");
    }
    Ok(())
}

/// Expand the `--device` flag into individual targets: `None` means the
/// single attached board, `all` means every one currently enumerated.
fn expand_device_arg(
    ctx: &Context,
    arg: Option<&str>,
    include_bootloader: bool,
) -> Result<Vec<Option<String>>> {
    match arg {
        None => Ok(vec![None]),
        Some(arg) if arg.eq_ignore_ascii_case("all") => {
            let mut serials: Vec<String> = locator::find_application_devices(ctx)?
                .into_keys()
                .collect();
            if include_bootloader {
                serials.extend(locator::find_bootloader_devices(ctx)?.into_keys());
            }
            if serials.is_empty() {
                anyhow::bail!("no devices attached");
            }
            Ok(serials.into_iter().map(Some).collect())
        }
        Some(arg) => Ok(arg
            .split(',')
            .map(|serial| Some(serial.trim().to_string()))
            .collect()),
    }
}
