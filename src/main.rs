//! USB Topology Enumerator - CLI entry point.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::io::{Stdout, stdout};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use usbtopo::config::{Config, example_config, generate_config};
use usbtopo::logging::setup_logging;
use usbtopo::output::{json, text};
use usbtopo::ui::{App, RefreshEvent, RefreshWorker, render};
use usbtopo::{DeviceTable, Enumerator, HostLocator, LoadError, Snapshot, SysfsLocator};

/// Lower bound on the TUI refresh interval.
const MIN_REFRESH_MS: u64 = 100;

#[derive(Parser)]
#[command(name = "usbtopo")]
#[command(about = "USB topology enumerator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: auto-detect)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sysfs USB device directory (default: from config)
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Log filter, e.g. "debug" (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices grouped by hub
    List,

    /// Show the hub tree under each root hub
    Tree,

    /// Export records as JSON
    Json {
        /// Include root hubs, host identifiers and skipped devices
        #[arg(long)]
        report: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Enumerate and verify the topology invariants
    Check,

    /// Dump fixed-layout records through the index-based interface
    Raw,

    /// Print blank example config file
    InitConfig,

    /// Generate config from current system
    GenerateConfig {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<LoadError>().is_some() {
                eprintln!(
                    "Hint: usbtopo reads /sys/bus/usb/devices. Check that sysfs is mounted, \
                     or point --sysfs-root / [host] sysfs_roots at the right directory."
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    // Handle commands that need neither config nor hardware
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "usbtopo", &mut std::io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::InitConfig) => {
            print!("{}", example_config());
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => Config::load().context("cannot load config")?,
    };

    if let Some(level) = log_level(&cli, &config) {
        setup_logging(level)?;
    }

    let locator = match &cli.sysfs_root {
        Some(path) => SysfsLocator::new(vec![path.clone()]),
        None => config.locator(),
    };
    let host = locator.locate()?;
    let enumerator = Enumerator::with_options(host, config.walk_options());

    match cli.command {
        Some(Commands::List) => {
            let snapshot = enumerate(&enumerator)?;
            print!("{}", text::grouped(&snapshot, &config));
        }
        Some(Commands::Tree) => {
            let snapshot = enumerate(&enumerator)?;
            print!("{}", text::tree(&snapshot, &config));
        }
        Some(Commands::Json { report, output }) => {
            let snapshot = enumerate(&enumerator)?;
            let content = if report {
                json::report(&snapshot)?
            } else {
                json::records(&snapshot)?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", content))
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    eprintln!("Topology saved to {}", path.display());
                }
                None => println!("{}", content),
            }
        }
        Some(Commands::Check) => {
            let snapshot = enumerate(&enumerator)?;
            return Ok(check(&snapshot));
        }
        Some(Commands::Raw) => {
            print_raw(DeviceTable::new(enumerator))?;
        }
        Some(Commands::GenerateConfig { output }) => {
            let snapshot = enumerate(&enumerator)?;
            let content = generate_config(&snapshot);
            match output {
                Some(path) => {
                    std::fs::write(&path, &content)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    eprintln!("Config written to {}", path.display());
                    eprintln!("Edit the file to customize labels, then copy to one of:");
                    eprintln!("  ./usbtopo.toml");
                    eprintln!("  ~/.config/usbtopo/config.toml");
                    eprintln!("  /etc/usbtopo.toml");
                }
                None => print!("{}", content),
            }
        }
        Some(Commands::Completions { .. }) | Some(Commands::InitConfig) => {
            // Handled above before loading config
            unreachable!()
        }
        None => {
            // Default: run TUI
            run_tui(enumerator, config)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Filter for stderr logging, or `None` when no subscriber may be installed.
/// The TUI draws on the terminal, so it never logs there, whatever `RUST_LOG`
/// says.
fn log_level<'a>(cli: &'a Cli, config: &'a Config) -> Option<&'a str> {
    if cli.command.is_none() {
        return None;
    }
    Some(
        cli.log_level
            .as_deref()
            .unwrap_or(config.settings.log_level.as_str()),
    )
}

fn enumerate(enumerator: &Enumerator) -> Result<Snapshot> {
    let snapshot = enumerator
        .enumerate()
        .context("USB enumeration failed")?;
    if let Some(warning) = snapshot.warning() {
        eprintln!("Warning: {}", warning);
    }
    Ok(snapshot)
}

fn check(snapshot: &Snapshot) -> ExitCode {
    match snapshot.validate() {
        Ok(()) => {
            println!(
                "OK: {} device(s) on {} hub(s), topology is consistent",
                snapshot.len(),
                snapshot.hub_count()
            );
            for error in snapshot.skipped() {
                println!("  skipped: {}", error);
            }
            ExitCode::SUCCESS
        }
        Err(violation) => {
            eprintln!("Topology violation: {}", violation);
            ExitCode::FAILURE
        }
    }
}

fn print_raw(table: DeviceTable) -> Result<()> {
    let count = table.enumerate().context("USB enumeration failed")?;
    println!("{} record(s)", count);

    for index in 0..count {
        let raw = table.device_record(index as i64)?;
        println!(
            "[{}] hub={} port={} is_hub={} speed={} vid=0x{:04X} pid=0x{:04X}",
            index,
            raw.hub_index,
            raw.port_number,
            raw.is_hub,
            raw.speed,
            raw.vendor_id,
            raw.product_id
        );
        println!("    description: {}", raw.description());
        println!("    device_path: {}", raw.device_path());
    }
    Ok(())
}

fn run_tui(enumerator: Enumerator, config: Config) -> Result<()> {
    // First pass happens before the screen switches so failures print normally.
    let snapshot = enumerator
        .enumerate()
        .context("USB enumeration failed")?;
    let refresh_ms = config.settings.refresh_ms.max(MIN_REFRESH_MS);
    let worker =
        RefreshWorker::spawn(Arc::new(enumerator)).context("cannot start refresh worker")?;
    let mut app = App::new(snapshot, config);

    // Initialize terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &mut app, &worker, refresh_ms);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    worker: &RefreshWorker,
    refresh_ms: u64,
) -> Result<()> {
    loop {
        while let Some(event) = worker.try_recv() {
            match event {
                RefreshEvent::Snapshot(snapshot) => app.update_snapshot(snapshot),
                RefreshEvent::Failed(message) => app.refresh_failed(message),
            }
        }

        terminal.draw(|f| render(f, app))?;

        // Poll for events with timeout for auto-refresh
        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('q') => break,
                KeyCode::Char('j') | KeyCode::Down => {
                    app.move_selection(1);
                }
                KeyCode::Char('k') | KeyCode::Up => {
                    app.move_selection(-1);
                }
                KeyCode::Enter | KeyCode::Char(' ') => {
                    app.toggle_expand();
                }
                KeyCode::Char('g') => {
                    app.goto_top();
                }
                KeyCode::Char('G') => {
                    app.goto_bottom();
                }
                KeyCode::Char('x') => {
                    app.toggle_expand_all();
                }
                KeyCode::Char('?') => {
                    app.show_help = !app.show_help;
                }
                KeyCode::Char('a') => {
                    app.auto_refresh = !app.auto_refresh;
                    let mode = if app.auto_refresh { "on" } else { "off" };
                    app.set_status(format!("Auto-refresh {}", mode));
                }
                KeyCode::Char('r') => {
                    request_refresh(app, worker);
                    app.set_status("Refreshing...".to_string());
                }
                KeyCode::Char('m') => {
                    app.mark_selected_seen();
                }
                KeyCode::Esc => {
                    app.show_help = false;
                }
                _ => {}
            }
        }

        if app.refresh_due(refresh_ms) {
            request_refresh(app, worker);
        }
    }

    Ok(())
}

fn request_refresh(app: &mut App, worker: &RefreshWorker) {
    if worker.request_refresh() {
        app.refresh_requested();
    } else {
        app.refresh_failed("refresh worker stopped".to_string());
    }
}
