//! Console remote control for the TennisGenius rig.
//!
//! Connects over TCP, sends one-letter commands, prints server status and
//! saves received photos under `photos/`.

use anyhow::Result;
use std::io::{self, Write};
use std::time::Duration;

use tgcontrol::client::{ClientEvent, ControlClient, SessionState};
use tgcontrol::config::Config;
use tgcontrol::protocol::Command;

const CONFIG_PATH: &str = "tgcontrol.toml";
const PHOTO_DIR: &str = "photos";

fn main() -> Result<()> {
    env_logger::init();

    let config = Config::load_or_default(CONFIG_PATH);
    let host = config.connection.resolve_host()?;
    let port = config.connection.port;

    println!("=== TGControl ({}) ===", env!("GIT_VERSION"));
    println!("Target: {} ({}:{})", config.connection.target, host, port);
    println!();
    println!("Commands:");
    println!("  c - connect");
    println!("  d - disconnect");
    println!("  r - start recording");
    println!("  s - stop recording");
    println!("  p - capture photo");
    println!("  t - start tracking");
    println!("  X - shut down the rig");
    println!("  q - quit");
    println!();

    let (client, events) = ControlClient::new();

    // Event printer; ends when the client is dropped.
    std::thread::spawn(move || {
        for event in events {
            print_event(event);
        }
    });

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }

        match input.trim() {
            "" => continue,
            "c" => client.connect(&host, port),
            "d" => client.disconnect(),
            "r" => client.send(&Command::StartRecording(config.camera.clone())),
            "s" => client.send(&Command::StopRecording),
            "p" => client.send(&Command::CapturePhoto(config.camera.clone())),
            "t" => client.send(&Command::StartTracking),
            "X" => client.send(&Command::ShutdownSystem),
            "q" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    client.disconnect();
    Ok(())
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::State(state) => {
            if state == SessionState::Idle {
                println!("[state] disconnected");
            } else {
                println!("[state] {:?}", state);
            }
        }
        ClientEvent::Status { label, text } => match label {
            Some(label) => println!("[{}] {}", label, text),
            None => println!("{}", text),
        },
        ClientEvent::RecordingProgress { stats, elapsed } => {
            let time = match elapsed {
                Some(e) => format_elapsed(e),
                None => "--:--".to_string(),
            };
            println!(
                "Frames: {:5} {:5} | Time {} | Free Disk {:.1} Gb",
                stats.frames_processed, stats.frames_written, time, stats.free_gb
            );
        }
        ClientEvent::Image { name, image } => match save_photo(&name, &image) {
            Ok(path) => println!("Saved {} ({}x{})", path, image.width(), image.height()),
            Err(e) => eprintln!("[error] failed to save {}: {:#}", name, e),
        },
        ClientEvent::ServerStopped { reason } => {
            println!("[server stop] {}", reason);
        }
        ClientEvent::Error(message) => {
            eprintln!("[error] {}", message);
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", (secs / 60) % 60, secs % 60)
}

fn save_photo(name: &str, image: &image::DynamicImage) -> Result<String> {
    std::fs::create_dir_all(PHOTO_DIR)?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("{}/{}_{}.jpg", PHOTO_DIR, name, ts);
    image.save(&path)?;
    Ok(path)
}
