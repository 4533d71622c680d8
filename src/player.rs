//! External player launcher
//!
//! Live streams are handed straight to a player process as an HLS URL. The
//! proxy is never involved in playback.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;

use tracing::{debug, info};

use crate::models::mask_password;

/// What to play and how to label it.
pub struct PlayRequest<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub user_agent: Option<&'a str>,
}

/// Command-line arguments for the known players; anything else just gets the URL.
pub fn player_args(player: &str, request: &PlayRequest) -> Vec<String> {
    let player_lower = player.to_lowercase();
    let url = request.url.to_string();
    let title = request.title.to_string();
    let mut args = vec![url];

    if player_lower.contains("ffplay") {
        args.extend([
            "-autoexit".to_string(),
            "-window_title".to_string(),
            title,
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_streamed".to_string(),
            "1".to_string(),
        ]);
        if let Some(agent) = request.user_agent {
            args.extend(["-user_agent".to_string(), agent.to_string()]);
        }
    } else if player_lower.contains("mpv") {
        args.extend([
            format!("--title={}", title),
            "--cache=yes".to_string(),
            "--ytdl=no".to_string(),
        ]);
        if let Some(agent) = request.user_agent {
            args.push(format!("--user-agent={}", agent));
        }
    } else if player_lower.contains("vlc") {
        args.extend([format!("--meta-title={}", title), "--http-reconnect".to_string()]);
        if let Some(agent) = request.user_agent {
            args.push(format!("--http-user-agent={}", agent));
        }
    }

    args
}

/// Start `player` on the stream. Player stderr is forwarded to the debug log.
pub fn launch(player: &str, request: &PlayRequest) -> std::io::Result<Child> {
    let mut cmd = Command::new(player);
    cmd.args(player_args(player, request));
    if let Some(agent) = request.user_agent {
        cmd.env("USER_AGENT", agent);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    info!(
        "Player {} launched (PID: {}) for {}",
        player,
        child.id(),
        mask_stream_url(request.url)
    );

    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                if !line.trim().is_empty() {
                    debug!("[PLAYER] {}", line);
                }
            }
        });
    }

    Ok(child)
}

/// `/live/{user}/{pass}/{id}.m3u8` carries the password in the path.
fn mask_stream_url(url: &str) -> String {
    let masked = mask_password(url);
    match masked.find("/live/") {
        Some(idx) => {
            let (head, tail) = masked.split_at(idx + "/live/".len());
            let mut parts: Vec<&str> = tail.splitn(3, '/').collect();
            if parts.len() == 3 {
                parts[1] = "***";
            }
            format!("{}{}", head, parts.join("/"))
        }
        None => masked,
    }
}
