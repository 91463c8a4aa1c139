//! toolbar-hammer - press a macOS app's toolbar buttons by index
#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

#[cfg(target_os = "macos")]
mod accessibility;
mod cache;
mod config;
mod coordinator;
mod error;
mod lifecycle;
#[cfg(test)]
mod mock_tree;
mod timer;
mod toolbar;
mod tree;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam::channel::{Receiver, unbounded};
use crossbeam::select;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use config::Config;
use coordinator::{CacheCoordinator, CoordinatorSnapshot};
use error::HammerError;
use lifecycle::SystemProcesses;
use tree::{ElementTree, Frame};

/// toolbar-hammer - press a macOS app's toolbar buttons by index
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: <config dir>/toolbar-hammer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target application process name, overrides the config
    #[arg(long, global = true)]
    app: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Press the toolbar button at INDEX (0-based)
    Press { index: usize },
    /// List the cached toolbar buttons
    List {
        #[arg(long)]
        json: bool,
    },
    /// Dump the focused window's element hierarchy
    Tree {
        #[arg(long, default_value_t = 4)]
        depth: usize,
    },
    /// Show running state and cache occupancy
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Follow the target app and press buttons read from stdin
    Watch,
}

static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Debug, Serialize)]
struct ButtonInfo {
    index: usize,
    role: Option<String>,
    frame: Option<Frame>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = config::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(app) = args.app {
        config.target_app = app;
        config.validate()?;
    }

    run(args.command, config)
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "toolbar_hammer=debug"
    } else {
        "toolbar_hammer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(target_os = "macos")]
fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    use std::sync::Arc;

    wait_for_accessibility()?;

    let tree = Arc::new(accessibility::AxTree::new());
    let coordinator = CacheCoordinator::new(tree, config.coordinator_settings());
    let result = handle_command(command, &coordinator, &config);
    coordinator.shutdown();
    result
}

#[cfg(not(target_os = "macos"))]
fn run(_command: Commands, _config: Config) -> anyhow::Result<()> {
    Err(HammerError::Unsupported(
        "the Accessibility API is only available on macOS".to_string(),
    )
    .into())
}

#[cfg(target_os = "macos")]
fn wait_for_accessibility() -> anyhow::Result<()> {
    const MAX_WAIT_ATTEMPTS: u32 = 30;

    let mut attempts = 0;
    loop {
        match accessibility::test_api_access() {
            Ok(()) => {
                tracing::debug!("Accessibility API working");
                return Ok(());
            }
            Err(e) => {
                if attempts == 0 {
                    eprintln!("\n⚠️  Accessibility API not available: {}", e);
                    eprintln!("\nSteps to fix:");
                    eprintln!("1. System Settings → Privacy & Security → Accessibility");
                    eprintln!("2. Add the terminal running toolbar-hammer AND CHECK it");
                    eprintln!("\nOpening System Settings...\n");

                    accessibility::request_accessibility_permissions();

                    let _ = std::process::Command::new("open")
                        .arg("x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility")
                        .spawn();
                }

                attempts += 1;
                if attempts >= MAX_WAIT_ATTEMPTS {
                    return Err(e.into());
                }
                if attempts % 5 == 0 {
                    eprintln!("Still waiting for permissions... (attempt {})", attempts);
                }

                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

/// Seed the lifecycle state from one process scan.
fn sync_lifecycle<T: ElementTree>(coordinator: &CacheCoordinator<T>) {
    let target = &coordinator.settings().target_app;
    let running = SystemProcesses::new().pid_for_name(target).is_some();
    coordinator.notify_process_lifecycle(running);
}

fn handle_command<T: ElementTree>(
    cmd: Commands,
    coordinator: &CacheCoordinator<T>,
    config: &Config,
) -> anyhow::Result<()> {
    if !matches!(cmd, Commands::Watch) {
        sync_lifecycle(coordinator);
    }

    match cmd {
        Commands::Press { index } => {
            coordinator.press_button(index)?;
            println!("✓ Pressed button {}", index);
        }
        Commands::List { json } => {
            coordinator.ensure_ready()?;
            let buttons = describe_buttons(coordinator);
            if json {
                println!("{}", serde_json::to_string_pretty(&buttons)?);
            } else {
                print_buttons(&buttons);
            }
        }
        Commands::Tree { depth } => {
            let elements = &**coordinator.tree();
            let target = &coordinator.settings().target_app;
            let app = elements
                .find_application(target)
                .ok_or(HammerError::ApplicationNotFound)?;
            let window = elements
                .focused_window(&app)
                .ok_or(HammerError::WindowNotFound)?;
            print!("{}", tree::describe_hierarchy(elements, &window, depth));
        }
        Commands::Status { json } => {
            let snapshot = coordinator.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(&snapshot);
            }
        }
        Commands::Watch => run_watch(coordinator, config)?,
    }

    Ok(())
}

fn describe_buttons<T: ElementTree>(coordinator: &CacheCoordinator<T>) -> Vec<ButtonInfo> {
    let tree = coordinator.tree();
    coordinator
        .buttons()
        .iter()
        .enumerate()
        .map(|(index, button)| ButtonInfo {
            index,
            role: tree.role(button),
            frame: tree.frame(button),
        })
        .collect()
}

fn print_buttons(buttons: &[ButtonInfo]) {
    if buttons.is_empty() {
        println!("No toolbar buttons cached.");
        return;
    }

    for button in buttons {
        let role = button.role.as_deref().unwrap_or("<stale>");
        match button.frame {
            Some(f) => println!(
                "  [{}] {} at ({}, {}) {}x{}",
                button.index, role, f.x, f.y, f.width, f.height
            ),
            None => println!("  [{}] {}", button.index, role),
        }
    }
}

fn print_status(snapshot: &CoordinatorSnapshot) {
    let state = if snapshot.state.is_running() {
        "running"
    } else {
        "not running"
    };
    println!("{}: {}", snapshot.target_app, state);
    println!(
        "  Application cached: {}",
        if snapshot.application_cached { "yes" } else { "no" }
    );
    println!("  Windows cached: {}", snapshot.windows_cached);
    println!("  Buttons cached: {}", snapshot.buttons_cached);
    println!(
        "  Retry: {} attempt(s){}",
        snapshot.retry_attempts,
        if snapshot.retry_pending { ", pending" } else { "" }
    );
}

fn run_watch<T: ElementTree>(
    coordinator: &CacheCoordinator<T>,
    config: &Config,
) -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        println!("\nShutting down...");
        RUNNING.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    coordinator.start_monitoring(SystemProcesses::new(), config.poll_interval())?;

    println!("🔨 Watching {}", config.target_app);
    println!("  <index> - press toolbar button");
    println!("  refresh - revalidate the cache");
    println!("  status  - show cache state");

    let lines = spawn_stdin_reader()?;
    while RUNNING.load(Ordering::SeqCst) {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => handle_watch_line(coordinator, line.trim()),
                Err(_) => break,
            },
            default(Duration::from_millis(100)) => {}
        }
    }

    Ok(())
}

fn spawn_stdin_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn handle_watch_line<T: ElementTree>(coordinator: &CacheCoordinator<T>, line: &str) {
    match line {
        "" => {}
        "refresh" => match coordinator.ensure_ready() {
            Ok(()) => println!("✓ {} buttons ready", coordinator.buttons().len()),
            Err(e) => eprintln!("✗ Failed: {}", e),
        },
        "status" => print_status(&coordinator.snapshot()),
        other => match other.parse::<usize>() {
            Ok(index) => match coordinator.press_button(index) {
                Ok(()) => println!("✓ Pressed button {}", index),
                Err(e) => eprintln!("✗ Failed: {}", e),
            },
            Err(_) => eprintln!("Unknown command: {}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_globals() {
        let args = Args::try_parse_from(["toolbar-hammer", "press", "3", "--app", "Preview"]).unwrap();
        assert!(matches!(args.command, Commands::Press { index: 3 }));
        assert_eq!(args.app.as_deref(), Some("Preview"));

        let args = Args::try_parse_from(["toolbar-hammer", "-v", "tree"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Tree { depth: 4 }));
    }

    #[test]
    fn rejects_negative_index() {
        assert!(Args::try_parse_from(["toolbar-hammer", "press", "-1"]).is_err());
    }

    #[test]
    fn button_info_serializes_frame() {
        let info = ButtonInfo {
            index: 0,
            role: Some("AXButton".to_string()),
            frame: Some(Frame {
                x: 10.0,
                y: 20.0,
                width: 40.0,
                height: 40.0,
            }),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["frame"]["width"], 40.0);
        assert_eq!(json["role"], "AXButton");
    }
}
