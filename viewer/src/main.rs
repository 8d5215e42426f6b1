mod dispatch;
mod display;
mod filter;
mod handoff;
mod overlay;
mod processor;
mod recorder;
mod viewer;

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};
use realsense_viewer_capture::{list_devices, open_device, DeviceId};
use realsense_viewer_common::config::Config;
use realsense_viewer_common::frame::PointFormat;
use tracing::{error, info};
#[cfg(not(feature = "gui"))]
use tracing::debug;

/// Stream point clouds from a RealSense camera, tune its filters and record
/// frames to disk.
#[derive(Debug, Parser)]
#[command(name = "realsense-viewer", version)]
struct Args {
    /// List connected devices and exit.
    #[arg(short, long)]
    list: bool,

    /// Stream geometry only, without color.
    #[arg(long)]
    xyz: bool,

    /// TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serial number or `#<index>` of the device; first available if omitted.
    device_id: Option<String>,
}

fn keyboard_help() -> String {
    let mut help = String::from("Keyboard commands:\n");
    for (keys, what) in dispatch::KEY_BINDINGS {
        help.push_str(&format!("  {keys:<7} {what}\n"));
    }
    help
}

fn parse_args() -> Args {
    let matches = Args::command().after_help(keyboard_help()).get_matches();
    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

fn device_report(serials: &[String]) -> String {
    let mut out = String::from("Connected devices: ");
    if serials.is_empty() {
        out.push_str("none");
    }
    for (i, serial) in serials.iter().enumerate() {
        out.push_str(&format!("\n  #{}  {serial}", i + 1));
    }
    out
}

fn main() {
    let args = parse_args();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.list {
        println!("{}", device_report(&list_devices(&config.capture)));
        return;
    }

    let format = if args.xyz { PointFormat::Xyz } else { PointFormat::XyzRgba };
    let id = DeviceId::parse(args.device_id.as_deref().unwrap_or_default());
    let device = match open_device(&config.capture, &id, format) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, device = %id, "failed to open capture device");
            std::process::exit(1);
        }
    };

    info!(
        serial = device.serial_number(),
        backend = ?config.capture.backend,
        ?format,
        output_dir = %config.recording.output_dir.display(),
        "starting realsense viewer"
    );

    if let Err(e) = run(&config, device) {
        error!(error = %e, "viewer terminated");
        std::process::exit(1);
    }
}

#[cfg(feature = "gui")]
fn run(
    config: &Config,
    device: Box<dyn realsense_viewer_capture::CaptureDevice>,
) -> Result<(), viewer::ViewerError> {
    let display = display::kiss3d::Kiss3dDisplay::new(&config.viewer);
    let recorder = recorder::Recorder::new(config.recording.output_dir.clone());
    viewer::Viewer::new(display, device, recorder).run()
}

#[cfg(not(feature = "gui"))]
fn run(
    _config: &Config,
    device: Box<dyn realsense_viewer_capture::CaptureDevice>,
) -> Result<(), viewer::ViewerError> {
    debug!(serial = device.serial_number(), "closing device, nothing to display on");
    Err(viewer::ViewerError::NoDisplay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_accept_device_id_last() {
        let args = Args::try_parse_from(["realsense-viewer", "--xyz", "#2"]).unwrap();
        assert!(args.xyz);
        assert!(!args.list);
        assert_eq!(args.device_id.as_deref(), Some("#2"));
    }

    #[test]
    fn short_list_flag() {
        let args = Args::try_parse_from(["realsense-viewer", "-l"]).unwrap();
        assert!(args.list);
        assert!(args.device_id.is_none());
    }

    #[test]
    fn device_report_format() {
        assert_eq!(device_report(&[]), "Connected devices: none");
        let serials = vec!["SIM-0001".to_string(), "SIM-0002".to_string()];
        assert_eq!(
            device_report(&serials),
            "Connected devices: \n  #1  SIM-0001\n  #2  SIM-0002"
        );
    }

    #[test]
    fn help_lists_every_key() {
        let help = keyboard_help();
        for key in ["w / W", "t / T", "k", "b", "a / A", "z / Z", "p", "s"] {
            assert!(help.contains(key), "{key} missing");
        }
    }

    #[cfg(not(feature = "gui"))]
    #[test]
    fn headless_build_reports_missing_display() {
        let config = Config::default();
        let device = open_device(&config.capture, &DeviceId::First, PointFormat::Xyz).unwrap();
        let err = run(&config, device).unwrap_err();
        assert!(matches!(err, viewer::ViewerError::NoDisplay));
        assert!(err.to_string().contains("gui"));
    }

    #[test]
    fn help_exits_cleanly() {
        let err = Args::command()
            .after_help(keyboard_help())
            .try_get_matches_from(["realsense-viewer", "-h"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert!(err.to_string().contains("Keyboard commands"));
    }
}
