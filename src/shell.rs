//! Interactive shell
//!
//! One line per UI event: pick a category, search, pick a date, show a
//! channel's guide, play. Errors are printed and the session carries on.

use std::io::{self, BufRead, Write};
use std::process::Child;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::player::{self, PlayRequest};
use crate::session::Session;
use crate::view;

const HELP: &str = "\
Commands:
  categories                 list live categories
  open <id|name>             list the channels of a category
  channels                   list the channels of the current category
  search <text>              filter current channels by name
  date <YYYY-MM-DD|today|all> set the guide date (default all)
  epg <stream id>            show the guide for a channel
  play <stream id>           play a channel
  url <stream id>            print the stream URL
  logout                     forget the saved login and leave
  quit                       leave";

pub struct PlayerSettings {
    pub command: String,
    pub user_agent: Option<String>,
    /// Print the stream URL instead of starting a player.
    pub print_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    Quit,
    LoggedOut,
}

pub struct Shell<'a, W: Write> {
    session: &'a mut Session,
    player: PlayerSettings,
    date: Option<NaiveDate>,
    current_player: Option<Child>,
    out: W,
}

impl<'a, W: Write> Shell<'a, W> {
    pub fn new(session: &'a mut Session, player: PlayerSettings, out: W) -> Self {
        Self {
            session,
            player,
            date: None,
            current_player: None,
            out,
        }
    }

    /// Initial view after login: first category's channels, then the guide.
    pub fn start(&mut self) -> io::Result<()> {
        let listing = match self.session.select_first() {
            Ok(_) => self.channel_listing(None),
            Err(e) => view::error(&e),
        };
        writeln!(self.out, "{}", listing.trim_end())?;

        if let Err(e) = self.session.rebuild_epg() {
            writeln!(self.out, "{}", e)?;
        }
        Ok(())
    }

    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<ShellOutcome> {
        write!(self.out, "> ")?;
        self.out.flush()?;

        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                if let Some(outcome) = self.dispatch(line)? {
                    return Ok(outcome);
                }
            }
            write!(self.out, "> ")?;
            self.out.flush()?;
        }
        writeln!(self.out)?;
        self.stop_player();
        Ok(ShellOutcome::Quit)
    }

    fn dispatch(&mut self, line: &str) -> io::Result<Option<ShellOutcome>> {
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        let text = match command {
            "help" | "?" => HELP.to_string(),
            "quit" | "exit" => {
                self.stop_player();
                return Ok(Some(ShellOutcome::Quit));
            }
            "logout" => {
                self.stop_player();
                return Ok(Some(ShellOutcome::LoggedOut));
            }
            "categories" | "cats" => view::categories(self.session.categories()),
            "open" => self.open(arg),
            "channels" => self.channel_listing(None),
            "search" => self.channel_listing(Some(arg)),
            "date" => self.set_date(arg),
            "epg" => self.guide(arg),
            "play" => self.play(arg),
            "url" => match self.session.find_channel(arg) {
                Some(channel) => self.session.stream_url(&channel.stream_id),
                None => format!("Unknown channel '{}'.", arg),
            },
            _ => format!("Unknown command '{}'. Type 'help'.", command),
        };

        writeln!(self.out, "{}", text.trim_end())?;
        Ok(None)
    }

    fn open(&mut self, key: &str) -> String {
        let Some(id) = self.session.find_category(key).map(|c| c.id.clone()) else {
            return format!("Unknown category '{}'.", key);
        };
        match self.session.select_category(&id) {
            Ok(_) => self.channel_listing(None),
            Err(e) => view::error(&e),
        }
    }

    fn channel_listing(&self, search: Option<&str>) -> String {
        let channels = self.session.search(search.unwrap_or(""));
        let header = self
            .session
            .selected_category()
            .map(|c| format!("[{}]\n", c.name))
            .unwrap_or_default();
        let guide = Some((self.session.epg(), Utc::now()));
        format!("{}{}", header, view::channels(&channels, guide))
    }

    fn set_date(&mut self, arg: &str) -> String {
        match arg {
            "" | "today" => self.date = Some(self.session.zone().today()),
            "all" => self.date = None,
            _ => match NaiveDate::parse_from_str(arg, "%Y-%m-%d") {
                Ok(date) => self.date = Some(date),
                Err(_) => return "Invalid date, use YYYY-MM-DD.".to_string(),
            },
        }
        match self.date {
            Some(date) => format!("Guide date: {}", date),
            None => "Guide date: all".to_string(),
        }
    }

    fn guide(&self, stream_id: &str) -> String {
        let Some(channel) = self.session.find_channel(stream_id) else {
            return format!("Unknown channel '{}'.", stream_id);
        };
        let result = self
            .session
            .schedule(channel.epg_channel_id.as_deref(), self.date);
        format!(
            "{}\n{}",
            channel.name,
            view::schedule(&result, self.session.zone())
        )
    }

    /// One player at a time: the previous one is killed and reaped first.
    fn play(&mut self, stream_id: &str) -> String {
        let Some(channel) = self.session.find_channel(stream_id) else {
            return format!("Unknown channel '{}'.", stream_id);
        };
        let name = channel.name.clone();
        let url = self.session.stream_url(&channel.stream_id);
        if self.player.print_only {
            return url;
        }

        self.stop_player();
        let request = PlayRequest {
            url: &url,
            title: &name,
            user_agent: self.player.user_agent.as_deref(),
        };
        match player::launch(&self.player.command, &request) {
            Ok(child) => {
                self.current_player = Some(child);
                format!("Playing {}", name)
            }
            Err(e) => {
                warn!("Failed to launch player '{}': {}", self.player.command, e);
                format!("Failed to launch player '{}': {}", self.player.command, e)
            }
        }
    }

    fn stop_player(&mut self) {
        if let Some(mut child) = self.current_player.take() {
            let _ = child.kill();
            match child.wait() {
                Ok(status) => debug!("Player (PID: {}) stopped: {}", child.id(), status),
                Err(e) => warn!("Failed to reap player (PID: {}): {}", child.id(), e),
            }
        }
    }
}

impl<W: Write> Drop for Shell<'_, W> {
    fn drop(&mut self) {
        self.stop_player();
    }
}
