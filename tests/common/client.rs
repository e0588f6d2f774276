//! Test IRC client.
//!
//! Sends raw lines and asserts on received lines.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// A test IRC client.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TestClient {
    /// Connect to the bouncer.
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    /// Send a raw IRC line.
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with("\r\n") {
            self.writer.write_all(b"\r\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive a single line, without the trailing CRLF.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive a line with a timeout.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        let mut line = String::new();
        let read = timeout(dur, self.reader.read_line(&mut line)).await??;
        if read == 0 {
            anyhow::bail!("connection closed");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Receive lines until the predicate returns true.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = predicate(&line);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Receive lines until one contains `needle`.
    pub async fn expect(&mut self, needle: &str) -> anyhow::Result<Vec<String>> {
        self.recv_until(|line| line.contains(needle)).await
    }

    /// Log in with `PASS user:password`, `NICK` and `USER`, waiting for `001`.
    pub async fn login(&mut self, user: &str, password: &str, nick: &str) -> anyhow::Result<Vec<String>> {
        self.send_raw(&format!("PASS {user}:{password}")).await?;
        self.send_raw(&format!("NICK {nick}")).await?;
        self.send_raw(&format!("USER {user} 0 * :Test User")).await?;
        self.recv_until(|line| line.split(' ').nth(1) == Some("001"))
            .await
    }

    /// Send a bot command as a PRIVMSG to the bot nick.
    pub async fn command(&mut self, text: &str) -> anyhow::Result<()> {
        self.send_raw(&format!("PRIVMSG -BNC :{text}")).await
    }

    /// Wait until the server closes the connection, returning what it sent.
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
