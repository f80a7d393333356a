//! Command-line harness for the filmscan driver.
//!
//! Small wrapper over the adapter surface: enumerate scanners, show holder
//! and lamp state, acquire a frame into a raw RGB file, or park the
//! mechanics. Set `RUST_LOG=filmscan_core=debug` to watch the wire.

use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use filmscan_core::adapter::{OPT_FRAME_NEGATIVE, OPT_FRAME_SLIDE, OptionValue, ScannerBackend};
use filmscan_core::{ScanConfig, Session, UsbDevice};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("list") => cmd_list(),
        Some("status") => cmd_status(args.iter().any(|arg| arg == "--json")),
        Some("scan") => cmd_scan(&args[1..]),
        Some("park") => cmd_park(),
        _ => {
            usage();
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("filmscan: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn usage() {
    eprintln!(
        "usage: filmscan <command>\n\
         \n\
         commands:\n\
         \x20 list                      list attached scanners\n\
         \x20 status [--json]           show holder, lamp and device state\n\
         \x20 scan <frame> [options]    acquire one frame\n\
         \x20 park                      home the mechanics and switch the lamp off\n\
         \n\
         scan options:\n\
         \x20 --slide                   frame is on the slide tray (default: negative strip)\n\
         \x20 --auto                    run the auto-exposure pre-pass\n\
         \x20 --output <path>           raw RGB output file (default: frame.raw)"
    );
}

fn open_backend() -> Result<ScannerBackend<UsbDevice>> {
    let config = ScanConfig::load_default().context("loading configuration")?;
    let device = UsbDevice::open_named(None).context("opening scanner")?;
    let session =
        Session::open_with_params(device, config.to_params()).context("initialising scanner")?;
    Ok(ScannerBackend::from_session(session))
}

fn cmd_list() -> Result<()> {
    let devices = filmscan_core::list_devices()?;
    if devices.is_empty() {
        println!("no scanners found");
        return Ok(());
    }
    for device in devices {
        println!(
            "{}  {:04x}:{:04x}  {}",
            device.name, device.vendor_id, device.product_id, device.product
        );
    }
    Ok(())
}

fn cmd_status(json: bool) -> Result<()> {
    let mut backend = open_backend()?;

    let lamp_secs = backend.session_mut().lamp_test()?;
    let film = backend.session_mut().refresh_film_status()?;
    let holder = match film.holder_type() {
        1 => "negative strip",
        2 => "slide tray",
        _ => "none",
    };
    let frames = film.frame_count();
    let position = film.holder_position();
    let product = backend.session().product().to_string();

    if json {
        let status = serde_json::json!({
            "product": product,
            "holder": holder,
            "frames": frames,
            "holder_position": position,
            "lamp_on_seconds": lamp_secs,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("product:  {product}");
        println!("holder:   {holder} ({frames} frames, position {position})");
        match lamp_secs {
            Some(secs) => println!("lamp:     on for {secs}s"),
            None => println!("lamp:     off"),
        }
    }

    backend.close()?;
    Ok(())
}

fn cmd_scan(args: &[String]) -> Result<()> {
    let mut frame: Option<i32> = None;
    let mut slide = false;
    let mut auto_exposure = false;
    let mut output = String::from("frame.raw");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--slide" => slide = true,
            "--auto" => auto_exposure = true,
            "--output" => {
                output = iter
                    .next()
                    .context("--output needs a path")?
                    .clone();
            }
            other => {
                if frame.is_some() {
                    bail!("unexpected argument '{other}'");
                }
                frame = Some(other.parse().with_context(|| format!("bad frame '{other}'"))?);
            }
        }
    }
    let frame = frame.context("scan needs a frame number")?;

    let mut backend = open_backend()?;
    backend.session_mut().set_feedback(Box::new(|message| {
        eprintln!("[scan] {message}");
    }));
    backend.set_auto_exposure(auto_exposure);

    let option = if slide { OPT_FRAME_SLIDE } else { OPT_FRAME_NEGATIVE };
    backend.set_option(option, OptionValue::Int(frame))?;

    backend.start().context("scanning")?;

    let params = backend.get_parameters();
    eprintln!(
        "frame: {} x {} pixels, {} bits per sample",
        params.pixels_per_line, params.lines, params.depth
    );

    let mut image = Vec::new();
    let mut chunk = vec![0u8; 65536];
    loop {
        let n = backend.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        image.extend_from_slice(&chunk[..n]);
    }
    fs::write(&output, &image).with_context(|| format!("writing {output}"))?;
    println!("wrote {} bytes to {output}", image.len());

    backend.close()?;
    Ok(())
}

fn cmd_park() -> Result<()> {
    let mut backend = open_backend()?;
    backend.session_mut().lamp_off(0)?;
    backend.session_mut().home()?;
    backend.close()?;
    println!("scanner parked");
    Ok(())
}
