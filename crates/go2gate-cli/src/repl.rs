//! REPL – operator shell for a running gateway.
//!
//! Supported slash-commands:
//!   /help                 – show this list
//!   /status               – robot target, listener sockets, relay, bus counters
//!   /send <action>        – send follow / block / research directly
//!   /quit | /exit         – stop the listener and exit
//!
//! Any other line is treated as model output and answered through the
//! command gateway, exactly as a chat front-end would.

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use go2gate_middleware::{EventBus, EventListener};
use go2gate_runtime::{CommandGateway, is_error_reply};
use go2gate_types::{Action, Transport};
use tokio::runtime::Handle;

/// How often the prompt loop checks the shutdown flag while idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Everything the shell needs from the running gateway.
pub struct Session {
    pub gateway: CommandGateway,
    pub bus: EventBus,
    pub listener: Option<EventListener>,
    pub cockpit_addr: Option<SocketAddr>,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Help,
    Status,
    Send(Action),
    SendUsage,
    Quit,
    UnknownSlash(String),
    ModelText(String),
}

pub fn parse_action(word: &str) -> Option<Action> {
    let word = word.trim().to_lowercase();
    Action::ALL.into_iter().find(|a| a.as_str() == word)
}

pub fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    if !line.starts_with('/') {
        return ReplCommand::ModelText(line.to_string());
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();
    match head {
        "/help" => ReplCommand::Help,
        "/status" => ReplCommand::Status,
        "/send" => parse_action(rest).map_or(ReplCommand::SendUsage, ReplCommand::Send),
        "/quit" | "/exit" => ReplCommand::Quit,
        other => ReplCommand::UnknownSlash(other.to_string()),
    }
}

/// Entry point for the interactive REPL.
///
/// Stdin is read on its own thread so `shutdown` (set by Ctrl-C) is noticed
/// within [`SHUTDOWN_POLL`] even while waiting for input.
pub fn run(shutdown: Arc<AtomicBool>, runtime: &Handle, session: &Session) {
    let lines = spawn_stdin_reader();
    let mut stdout = io::stdout();

    'prompt: loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        print!("{} ", "go2gate>".bold().cyan());
        stdout.flush().ok();

        let line = loop {
            match lines.recv_timeout(SHUTDOWN_POLL) {
                Ok(line) => break line,
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown.load(Ordering::SeqCst) {
                        println!();
                        break 'prompt;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break 'prompt,
            }
        };

        match parse_line(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Help => cmd_help(),
            ReplCommand::Status => cmd_status(session),
            ReplCommand::Send(action) => {
                let reply = runtime.block_on(session.gateway.dispatcher().execute(action));
                print_reply(&reply);
            }
            ReplCommand::SendUsage => {
                println!(
                    "{} {}",
                    "Usage:".yellow(),
                    "/send <follow|block|research>".bold()
                );
            }
            ReplCommand::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            ReplCommand::UnknownSlash(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
            ReplCommand::ModelText(text) => {
                let reply = runtime.block_on(session.gateway.reply(&text));
                print_reply(&reply);
            }
        }
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }
        }
    });
    rx
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "go2gate Commands".bold().underline());
    println!("  {}          – gateway status", "/status".bold().cyan());
    println!("  {} – send an action to the robot", "/send <action>".bold().cyan());
    println!("  {}    – exit", "/quit  /exit".bold().cyan());
    println!();
    println!("  Anything else is treated as model output, e.g.");
    println!("    {}", r#"{"cmd":"follow","say":"따라갈게요"}"#.dimmed());
    println!();
}

fn cmd_status(session: &Session) {
    println!("{}", "Gateway Status".bold().underline());
    println!(
        "  Robot     : {}",
        session.gateway.dispatcher().link().describe().yellow()
    );

    match &session.listener {
        Some(listener) => {
            println!("  Listener  : {:?}", listener.state());
            for transport in [Transport::Tcp, Transport::Udp] {
                if let Some(addr) = listener.local_addr(transport) {
                    println!("    {}://{}", transport, addr.to_string().bold());
                }
            }
        }
        None => println!("  Listener  : {}", "disabled".dimmed()),
    }

    match session.cockpit_addr {
        Some(addr) => println!("  Cockpit   : ws://{}", addr.to_string().bold()),
        None => println!("  Cockpit   : {}", "disabled".dimmed()),
    }

    let stats = session.bus.stats();
    println!(
        "  Event bus : {} subscriber(s), {} published, {} delivered, {} dropped",
        stats.subscribers, stats.published, stats.delivered, stats.dropped
    );

    println!("  Actions   :");
    for binding in session.gateway.dispatcher().actions().bindings() {
        println!(
            "    {:<9} → {}",
            binding.action.as_str(),
            binding.wire_name.bold()
        );
    }
}

fn print_reply(reply: &str) {
    if is_error_reply(reply) {
        println!("{}", reply.red());
    } else {
        println!("{}", reply.green());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(parse_line("   "), ReplCommand::Empty);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_line("/help"), ReplCommand::Help);
        assert_eq!(parse_line(" /status "), ReplCommand::Status);
        assert_eq!(parse_line("/quit"), ReplCommand::Quit);
        assert_eq!(parse_line("/exit"), ReplCommand::Quit);
        assert_eq!(
            parse_line("/dance now"),
            ReplCommand::UnknownSlash("/dance".to_string())
        );
    }

    #[test]
    fn send_parses_action_case_insensitively() {
        assert_eq!(parse_line("/send follow"), ReplCommand::Send(Action::Follow));
        assert_eq!(parse_line("/send  BLOCK "), ReplCommand::Send(Action::Block));
        assert_eq!(parse_line("/send research"), ReplCommand::Send(Action::Research));
    }

    #[test]
    fn send_without_valid_action_shows_usage() {
        assert_eq!(parse_line("/send"), ReplCommand::SendUsage);
        assert_eq!(parse_line("/send fly"), ReplCommand::SendUsage);
    }

    #[test]
    fn other_lines_are_model_text() {
        assert_eq!(
            parse_line(r#"  {"cmd":"follow"} "#),
            ReplCommand::ModelText(r#"{"cmd":"follow"}"#.to_string())
        );
        assert_eq!(
            parse_line("안녕"),
            ReplCommand::ModelText("안녕".to_string())
        );
    }
}
