use anyhow::{bail, Context, Result};
use attend_core::{normalize_rfid, UserRecord, UserStore};
use attend_hw::Camera;
use attendd::{CameraBackend, Config, FaceBackend};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attend", about = "Attendance system: register cards and faces, camera diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an RFID card together with the holder's face
    Register {
        /// Card holder's name
        #[arg(short, long)]
        name: String,
        /// Card UID as printed by the reader
        #[arg(short, long)]
        rfid: String,
        /// Replace an existing registration for this card
        #[arg(long)]
        force: bool,
    },
    /// List registered users
    List,
    /// Remove a registered card
    Delete {
        /// Card UID to remove
        rfid: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Check that the webcam delivers usable frames
    TestCamera {
        /// Number of frames to grab
        #[arg(short, long, default_value_t = 30)]
        frames: usize,
        /// Save the last frame to this image file (e.g. test.png)
        #[arg(short, long)]
        save: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Register { name, rfid, force } => register(&config, &name, &rfid, force),
        Commands::List => list(&config),
        Commands::Delete { rfid, yes } => delete(&config, &rfid, yes),
        Commands::TestCamera { frames, save } => test_camera(&config, frames, save),
        Commands::Devices => devices(),
    }
}

fn register(config: &Config, name: &str, rfid: &str, force: bool) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("name cannot be empty");
    }
    let rfid = normalize_rfid(rfid);
    if rfid.is_empty() {
        bail!("RFID cannot be empty");
    }

    let mut store = UserStore::open(config.users_path())?;
    if let Some(existing) = store.get(&rfid) {
        if !force {
            bail!(
                "RFID {rfid} is already registered to {}; pass --force to overwrite",
                existing.name
            );
        }
        println!("Overwriting registration of {} for {rfid}", existing.name);
    }

    let mut backend = CameraBackend::load(
        &config.camera_device,
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.detection_confidence,
    )
    .context("failed to load face models")?;

    println!("Capturing face for {name}: look directly at the camera, one person only...");
    let embedding = backend
        .capture(&config.capture_settings())
        .context("face capture failed; registration cancelled")?;

    store.insert(&rfid, UserRecord::new(name, &embedding)?)?;
    store.save()?;

    println!("Registered {name}");
    println!("  RFID:        {rfid}");
    println!("  Total users: {}", store.len());
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = UserStore::open(config.users_path())?;
    if store.is_empty() {
        println!("No users registered yet.");
    }
    for (i, (rfid, user)) in store.iter().enumerate() {
        println!("{:>3}. {}", i + 1, user.name);
        println!("     RFID: {rfid}");
    }
    println!("Total users: {}", store.len());
    Ok(())
}

fn delete(config: &Config, rfid: &str, yes: bool) -> Result<()> {
    let rfid = normalize_rfid(rfid);
    let mut store = UserStore::open(config.users_path())?;
    let Some(user) = store.get(&rfid) else {
        bail!("RFID {rfid} not found");
    };
    let name = user.name.clone();

    if !yes && !confirm(&format!("Delete {name} ({rfid})?"))? {
        println!("Deletion cancelled");
        return Ok(());
    }

    store.remove(&rfid);
    store.save()?;
    println!("Deleted {name}");
    Ok(())
}

/// Ask on stdin; only an explicit "yes" confirms.
fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (yes/no): ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("yes"))
}

fn test_camera(config: &Config, frames: usize, save: Option<PathBuf>) -> Result<()> {
    if let Some(path) = &save {
        image::ImageFormat::from_path(path)
            .with_context(|| format!("unsupported image extension: {}", path.display()))?;
    }

    println!("Opening {}...", config.camera_device);
    let camera = Camera::open(&config.camera_device).with_context(|| {
        format!(
            "could not open camera {}; check it is connected and not used by another program",
            config.camera_device
        )
    })?;
    println!(
        "Camera opened: {}x{} {:?}",
        camera.width, camera.height, camera.pixel_format
    );

    let mut stream = camera.stream()?;
    let mut dark = 0usize;
    let mut last = None;
    for _ in 0..frames.max(1) {
        let frame = stream.next_frame()?;
        if frame.is_dark {
            dark += 1;
        }
        last = Some(frame);
    }

    let Some(frame) = last else {
        bail!("no frames captured");
    };
    println!("Grabbed {} frames ({dark} dark)", frames.max(1));
    println!("Last frame #{}: brightness {:.1}", frame.sequence, frame.avg_brightness());

    if let Some(path) = save {
        let img = frame.to_image().context("frame buffer does not match its dimensions")?;
        img.save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

fn devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_register() {
        let cli = Cli::try_parse_from(["attend", "register", "--name", "Alice", "--rfid", "a1b2"]).unwrap();
        match cli.command {
            Commands::Register { name, rfid, force } => {
                assert_eq!(name, "Alice");
                assert_eq!(rfid, "a1b2");
                assert!(!force);
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_parse_delete_with_yes() {
        let cli = Cli::try_parse_from(["attend", "delete", "A1B2", "-y"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { yes: true, .. }));
    }

    #[test]
    fn test_parse_test_camera_defaults() {
        let cli = Cli::try_parse_from(["attend", "test-camera"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::TestCamera { frames: 30, save: None }
        ));
    }
}
