//! `go2gate` – robot command gateway.
//!
//! This binary boots the whole gateway:
//!
//! 1. Loads `~/.go2gate/config.toml`, running a **First-Run Wizard** when the
//!    file is absent.
//! 2. Starts the event bus, the TCP/UDP event listener and the WebSocket
//!    relay for observers.
//! 3. Drops the operator into an **interactive REPL** that feeds text through
//!    the command gateway (`/help` for commands).
//! 4. Intercepts **Ctrl-C** and stops the listener gracefully on the way out.

mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use go2gate_cockpit::CockpitServer;
use go2gate_hal::RobotLink;
use go2gate_middleware::{EventBus, EventListener};
use go2gate_runtime::{CommandGateway, Dispatcher};
use go2gate_types::GateError;

fn main() -> ExitCode {
    // The OTLP exporter is synchronous, so tracing goes up before the runtime.
    let _telemetry = go2gate_runtime::init_tracing("go2gate");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = run_first_run_wizard();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Runtime + boot ────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut session = match runtime.block_on(boot(&cfg)) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "gateway startup failed");
            println!("{}: {}", "Startup failed".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!(
        "  Robot target: {}",
        session.gateway.dispatcher().link().describe().bold()
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(shutdown, runtime.handle(), &session);

    if let Some(listener) = session.listener.as_mut() {
        runtime.block_on(listener.stop());
    }
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("go2gate exited");
    ExitCode::SUCCESS
}

/// Start every configured component. A bind failure is fatal.
async fn boot(cfg: &config::Config) -> Result<repl::Session, GateError> {
    let bus = EventBus::new(cfg.bus_capacity);

    let listener = if cfg.listener.enabled {
        let mut listener = EventListener::new(cfg.listener_config(), bus.clone());
        listener.start().await?;
        Some(listener)
    } else {
        None
    };

    let cockpit_addr = if cfg.cockpit.enabled {
        let bound = CockpitServer::new(bus.clone())
            .with_port(cfg.cockpit.port)
            .bind()
            .await?;
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());
        Some(addr)
    } else {
        None
    };

    let link: Arc<dyn RobotLink> = Arc::new(cfg.robot_client());
    let gateway = CommandGateway::new(Dispatcher::new(link, cfg.action_table()));

    Ok(repl::Session {
        gateway,
        bus,
        listener,
        cockpit_addr,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       go2gate First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Where is the robot?\n");

    let mut cfg = config::Config::default();

    cfg.robot.host = prompt_line(
        &format!("  Robot host [{}]: ", cfg.robot.host),
        &cfg.robot.host,
    );

    let port_str = prompt_line(
        &format!("  Robot port [{}]: ", cfg.robot.port),
        &cfg.robot.port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.robot.port = p;
    }

    let transport_str = prompt_line(
        &format!("  Transport (tcp / udp) [{}]: ", cfg.robot.transport),
        &cfg.robot.transport.to_string(),
    );
    match transport_str.parse() {
        Ok(t) => cfg.robot.transport = t,
        Err(e) => println!("  {} – keeping {}", e.to_string().yellow(), cfg.robot.transport),
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____      ___   ____       _       "#.bold().cyan());
    println!("{}", r#"  / ___| ___|_  ) / ___| __ _| |_ ___ "#.bold().cyan());
    println!("{}", r#" | |  _ / _ \/ / | |  _ / _` | __/ _ \"#.bold().cyan());
    println!("{}", r#" | |_| | (_) /_  | |_| | (_| | ||  __/"#.bold().cyan());
    println!("{}", r#"  \____|\___/___| \____|\__,_|\__\___|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "go2gate".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Conversational command gateway for robots");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
