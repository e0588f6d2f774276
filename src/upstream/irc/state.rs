//! What the bouncer remembers about an upstream IRC session.
//!
//! Updated from every line the server sends; read when a client attaches so
//! it can be brought up to date without asking the server again.

use crate::irc::{Line, irc_eq, irc_to_lower};
use std::collections::BTreeMap;

/// Registration numerics replayed to attaching clients.
const BURST_NUMERICS: std::ops::RangeInclusive<u16> = 1..=5;

/// Upper bound on cached burst lines (005 may span several).
const MAX_BURST_LINES: usize = 32;

/// What the driver should do in response to an upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing beyond fan-out.
    None,
    /// Answer a server `PING` with this token. Not fanned out.
    Pong(String),
    /// `001` arrived: the link is registered under the given nick.
    Registered { nick: String },
    /// Our nick was rejected during registration; try this one instead.
    Retry(String),
    /// Our own nick changed.
    NickChanged { old: String, new: String },
}

#[derive(Debug, Clone, Default)]
pub struct UpstreamState {
    nick: String,
    wanted_nick: String,
    altnick: Option<String>,
    server_name: Option<String>,
    registered: bool,
    burst: Vec<String>,
    /// Joined channels, keyed by folded name.
    channels: BTreeMap<String, String>,
}

impl UpstreamState {
    /// Start a fresh registration. Channels are kept so they can be rejoined.
    pub fn begin_registration(&mut self, nick: &str, altnick: Option<&str>) {
        self.nick = nick.to_string();
        self.wanted_nick = nick.to_string();
        self.altnick = altnick.filter(|a| !a.is_empty()).map(str::to_string);
        self.server_name = None;
        self.registered = false;
        self.burst.clear();
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Joined channels in display form, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.channels.values().cloned().collect()
    }

    /// Remove and return the channel list, for rejoining after reconnect.
    pub fn take_channels(&mut self) -> Vec<String> {
        std::mem::take(&mut self.channels).into_values().collect()
    }

    /// Cached 001-005 lines rewritten for `nick`.
    pub fn burst_for(&self, nick: &str) -> Vec<String> {
        self.burst
            .iter()
            .filter_map(|raw| {
                let mut line = Line::parse(raw)?;
                line.tags = None;
                if let Some(target) = line.params.first_mut() {
                    *target = nick;
                }
                Some(line.to_string())
            })
            .collect()
    }

    /// Update the state from one upstream line.
    pub fn observe(&mut self, raw: &str) -> Reaction {
        let Some(line) = Line::parse(raw) else {
            return Reaction::None;
        };

        if line.is("PING") {
            return Reaction::Pong(line.param(0).unwrap_or_default().to_string());
        }

        if let Some(numeric) = line.numeric() {
            return self.observe_numeric(numeric, raw, &line);
        }

        let from_us = line.source_nick().is_some_and(|n| irc_eq(n, &self.nick));
        if line.is("NICK") && from_us {
            if let Some(new) = line.param(0) {
                let old = std::mem::replace(&mut self.nick, new.to_string());
                return Reaction::NickChanged {
                    old,
                    new: new.to_string(),
                };
            }
        } else if line.is("JOIN") && from_us {
            if let Some(channels) = line.param(0) {
                for channel in channels.split(',') {
                    self.channels
                        .insert(irc_to_lower(channel), channel.to_string());
                }
            }
        } else if line.is("PART") && from_us {
            if let Some(channels) = line.param(0) {
                for channel in channels.split(',') {
                    self.channels.remove(&irc_to_lower(channel));
                }
            }
        } else if line.is("KICK") {
            if let (Some(channel), Some(victim)) = (line.param(0), line.param(1))
                && irc_eq(victim, &self.nick)
            {
                self.channels.remove(&irc_to_lower(channel));
            }
        }
        Reaction::None
    }

    fn observe_numeric(&mut self, numeric: u16, raw: &str, line: &Line<'_>) -> Reaction {
        if numeric == 1 {
            self.registered = true;
            self.burst.clear();
            if let Some(nick) = line.param(0) {
                self.nick = nick.to_string();
            }
            self.server_name = line.prefix.map(str::to_string);
        }

        if BURST_NUMERICS.contains(&numeric) && self.registered {
            if self.burst.len() < MAX_BURST_LINES {
                self.burst.push(raw.to_string());
            }
            if numeric == 1 {
                return Reaction::Registered {
                    nick: self.nick.clone(),
                };
            }
            return Reaction::None;
        }

        // 432 erroneous, 433 in use, 436 collision, 437 unavailable
        if matches!(numeric, 432 | 433 | 436 | 437) && !self.registered {
            let next = self.fallback_nick();
            self.nick = next.clone();
            return Reaction::Retry(next);
        }
        Reaction::None
    }

    /// Next nick to try after a rejection: the alternate nick once, then
    /// underscores appended.
    fn fallback_nick(&self) -> String {
        match &self.altnick {
            Some(alt) if self.nick == self.wanted_nick && !irc_eq(alt, &self.wanted_nick) => {
                alt.clone()
            }
            _ => format!("{}_", self.nick),
        }
    }
}
