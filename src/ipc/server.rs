use anyhow::{Result, anyhow};
use log::{error, info, warn};
use notify::{RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::mpsc::{self, Sender},
    thread,
    time::Duration,
};

use super::dispatch::parse_action;
use super::pipeline::{SurfaceCommand, run_pipeline};
use super::runtime::socket_path;
use crate::config::ConfigState;

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut cfg = ConfigState::load_or_install_default()?;
    info!("daemon: active profile '{}'", cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    let (tx_cmd, rx_cmd) = mpsc::channel::<SurfaceCommand>();

    // surface thread
    let profile = cfg.profile.clone();
    let _surface_thread = thread::Builder::new()
        .name("surface".into())
        .spawn(move || {
            if let Err(e) = run_pipeline(profile, rx_cmd) {
                error!("surface pipeline failed: {e}");
            }
        })?;

    // profile edits on disk reload the active profile
    let tx_watch = tx_req.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(ev) = res {
            if ev.kind.is_modify() || ev.kind.is_create() {
                let _ = tx_watch.send(IpcMsg::Reload);
            }
        }
    })?;
    if let Err(e) = watcher.watch(&cfg.profiles_dir, RecursiveMode::NonRecursive) {
        warn!("daemon: not watching {}: {e}", cfg.profiles_dir.display());
    }

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let tx_sig = tx_req.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: signal {sig}, shutting down");
            let _ = tx_sig.send(IpcMsg::Shutdown);
        }
    });

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let tx_cmd = tx_cmd.clone();
            let snapshot = cfg.clone();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, snapshot, tx, tx_cmd) {
                    error!("ipc client error: {e}");
                }
            });
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => {
                    if let Err(e) = cfg.reload() {
                        error!("reload failed, keeping last good profile: {e}");
                    } else {
                        let _ = tx_cmd.send(SurfaceCommand::UpdateProfile(Box::new(
                            cfg.profile.clone(),
                        )));
                        info!("profile reloaded");
                    }
                }
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = cfg.set_active(&name) {
                        error!("use profile failed: {e}");
                    } else {
                        let _ = tx_cmd.send(SurfaceCommand::UpdateProfile(Box::new(
                            cfg.profile.clone(),
                        )));
                        info!("switched active profile to {}", cfg.active_name);
                    }
                }
                IpcMsg::Shutdown => {
                    let _ = std::fs::remove_file(&sock);
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn handle_client(
    mut stream: UnixStream,
    cfg: ConfigState,
    tx_req: Sender<IpcMsg>,
    tx_cmd: Sender<SurfaceCommand>,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" | "text" => match surface_status(&tx_cmd) {
            Ok(status) if op == "text" => {
                serde_json::json!({"ok": true, "data": {"text": status["text"]}})
            }
            Ok(mut status) => {
                status["active_profile"] = serde_json::json!(cfg.active_name);
                status["socket"] = serde_json::json!(socket_path()?);
                serde_json::json!({"ok": true, "data": status})
            }
            Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
        },
        "clear" | "predict" | "invert" => match parse_action(op) {
            Some(cmd) => {
                let _ = tx_cmd.send(cmd);
                serde_json::json!({"ok": true, "data": op})
            }
            None => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
        },
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": cfg.active_name}})
        }
        "doctor" => {
            let report = cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    writeln!(stream, "{}", resp)?;
    Ok(())
}

fn surface_status(tx_cmd: &Sender<SurfaceCommand>) -> Result<serde_json::Value> {
    let (tx, rx) = mpsc::channel();
    tx_cmd
        .send(SurfaceCommand::Status(tx))
        .map_err(|_| anyhow!("surface thread is not running"))?;
    rx.recv_timeout(Duration::from_secs(1))
        .map_err(|_| anyhow!("surface thread did not answer"))
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Shutdown,
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "inkctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
