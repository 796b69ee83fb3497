use anyhow::{Context, Result, anyhow};
use pico_args::Arguments;
use std::{env, fs, process::Command};

use crate::config::ConfigState;
use crate::ipc;
use crate::replay::{self, Script};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("inkctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request("shutdown"),
        Some("status") => request("status"),
        Some("reload") => request("reload"),
        Some("list") => request("list"),
        Some("doctor") => request("doctor"),
        Some("clear") => request("clear"),
        Some("predict") => request("predict"),
        Some("invert") => request("invert"),

        Some("text") => {
            let r = ipc::client_request(serde_json::json!({"op":"text"}))?;
            match r["data"]["text"].as_str() {
                Some(text) if r["ok"] == true => println!("{text}"),
                _ => print_response(&r),
            }
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: inkctl use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("replay") => {
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: inkctl replay <script.json>"))?;
            let txt = fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
            let script = Script::parse(&txt).with_context(|| format!("bad script {path}"))?;
            let cfg = ConfigState::load_or_install_default()?;
            let report = replay::run_script(&script, &cfg.profile)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(op: &str) -> Result<()> {
    let r = ipc::client_request(serde_json::json!({ "op": op }))?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    let socket = ipc::socket_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "~/.local/run/inkctl.sock".into());
    println!(
        r#"inkctl: handwriting surface daemon

USAGE:
  inkctl help [command]        Show general or command-specific help
  inkctl start                 Start the daemon
  inkctl stop                  Stop the daemon
  inkctl status                Show surface state, strokes and pending requests
  inkctl reload                Reload active profile
  inkctl use <name>            Switch active profile
  inkctl list                  List profiles
  inkctl doctor                Diagnose permissions/devices
  inkctl clear                 Drop all strokes and the recognized text
  inkctl predict               Submit unsubmitted strokes for recognition now
  inkctl invert                Toggle inverted capture
  inkctl text                  Print the recognized text
  inkctl replay <script.json>  Run an event script offline and print requests

TIPS:
  - Profiles: ~/.config/inkctl/profiles
  - Active profile pointer: ~/.config/inkctl/active
  - Socket: {socket}
  - RUST_LOG=debug shows per-request confidence tables
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: inkctl start\nStarts the background daemon."),
        "stop" => println!("usage: inkctl stop\nStops the running daemon."),
        "status" => println!(
            "usage: inkctl status\nShows surface state, stroke count, submitted index, pending requests and text."
        ),
        "reload" => println!(
            "usage: inkctl reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: inkctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: inkctl list\nLists available profiles."),
        "doctor" => println!(
            "usage: inkctl doctor\nChecks permissions and lists detected pen devices."
        ),
        "clear" => println!(
            "usage: inkctl clear\nDrops strokes and text; replies still in flight are ignored."
        ),
        "predict" => println!(
            "usage: inkctl predict\nSends every stroke drawn since the last request for recognition."
        ),
        "invert" => println!("usage: inkctl invert\nToggles inverted capture colors."),
        "text" => println!("usage: inkctl text\nPrints the text recognized so far."),
        "replay" => println!(
            "usage: inkctl replay <script.json>\nRuns an event script through a fresh surface with the active profile."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
