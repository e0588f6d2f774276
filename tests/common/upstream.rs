//! Scripted upstream IRC server.
//!
//! Accepts connections from the bouncer and lets a test drive the server
//! side of the conversation line by line.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// Name the fake server uses as its prefix.
pub const UPSTREAM_NAME: &str = "upstream.test";

pub struct FakeUpstream {
    listener: TcpListener,
}

impl FakeUpstream {
    pub async fn bind() -> anyhow::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind("127.0.0.1:0").await?,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default()
    }

    /// Wait for the bouncer to connect.
    pub async fn accept(&self) -> anyhow::Result<UpstreamConn> {
        let (stream, _) = timeout(Duration::from_secs(10), self.listener.accept()).await??;
        let (read_half, write_half) = stream.into_split();
        Ok(UpstreamConn {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Accept a connection and complete registration for it.
    pub async fn accept_registered(&self) -> anyhow::Result<(UpstreamConn, String)> {
        let mut conn = self.accept().await?;
        let nick = conn.expect_registration().await?;
        conn.welcome(&nick).await?;
        Ok((conn, nick))
    }
}

/// The server side of one bouncer connection.
pub struct UpstreamConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl UpstreamConn {
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;
        if read == 0 {
            anyhow::bail!("bouncer closed the upstream connection");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Receive lines until one starts with `prefix`.
    pub async fn expect(&mut self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = line.starts_with(prefix);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Read the bouncer's `NICK`/`USER` registration, returning the nick.
    pub async fn expect_registration(&mut self) -> anyhow::Result<String> {
        let mut nick = None;
        let mut user = false;
        while nick.is_none() || !user {
            let line = self.recv().await?;
            if let Some(n) = line.strip_prefix("NICK ") {
                nick = Some(n.to_string());
            } else if line.starts_with("USER ") {
                user = true;
            }
        }
        Ok(nick.unwrap_or_default())
    }

    /// Send the 001-005 registration burst.
    pub async fn welcome(&mut self, nick: &str) -> anyhow::Result<()> {
        let s = UPSTREAM_NAME;
        self.send_raw(&format!(":{s} 001 {nick} :Welcome to the Test Network {nick}"))
            .await?;
        self.send_raw(&format!(":{s} 002 {nick} :Your host is {s}")).await?;
        self.send_raw(&format!(":{s} 003 {nick} :This server was created today"))
            .await?;
        self.send_raw(&format!(":{s} 004 {nick} {s} testircd-1 iow bklmnost"))
            .await?;
        self.send_raw(&format!(
            ":{s} 005 {nick} CHANTYPES=# NETWORK=Test :are supported by this server"
        ))
        .await?;
        Ok(())
    }

    /// Wait for the bouncer to hang up, returning what it sent first.
    pub async fn expect_closed(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await? {
                Ok(0) | Err(_) => return Ok(lines),
                Ok(_) => lines.push(line.trim_end_matches(['\r', '\n']).to_string()),
            }
        }
    }
}
