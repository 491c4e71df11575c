use anyhow::{Context, Result};
use raftkv::clerk::Clerk;
use raftkv::transport::TcpTransport;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

/// Phase 1: reads `a <ip> <port>` lines from stdin until `done`, building the
/// server list the clerk dials. Phase 2: an interactive REPL of
/// `get`/`put`/`append`/`write` commands against that cluster.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let servers = read_server_lines()?;
    if servers.is_empty() {
        anyhow::bail!("no servers given before 'done'");
    }

    let transport = Arc::new(TcpTransport::default());
    let clerk = Clerk::new(servers, transport);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading command line from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["get", key] => {
                let value = clerk.get(key).await;
                println!("{value}");
            }
            ["put", key, value] => {
                clerk.put(key, value).await;
            }
            ["append", key, value] => {
                clerk.append(key, value).await;
            }
            ["write", key] => {
                let value = clerk.get(key).await;
                fs::write(key, value).with_context(|| format!("writing file '{key}'"))?;
            }
            _ => anyhow::bail!(
                "unrecognized command '{line}', expected 'get <key>' / 'put <key> <value>' / 'append <key> <value>' / 'write <key>'"
            ),
        }
        io::stdout().flush().ok();
    }
    Ok(())
}

fn read_server_lines() -> Result<Vec<String>> {
    let stdin = io::stdin();
    let mut servers = Vec::new();
    for line in stdin.lock().lines() {
        let line = line.context("reading server line from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "done" {
            return Ok(servers);
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 || parts[0] != "a" {
            anyhow::bail!("expected 'a <ip> <port>' or 'done', got '{line}'");
        }
        servers.push(format!("{}:{}", parts[1], parts[2]));
    }
    anyhow::bail!("stdin closed before 'done'")
}
