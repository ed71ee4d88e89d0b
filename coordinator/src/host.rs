use std::net::SocketAddr;

use anyhow::Context;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};

use dimmer_common::{
    frame::encode_command, DeviceAddress, Frame, FrameReassembler, PendingCommand, StateFrame,
};

const COMMAND_BACKLOG: usize = 64;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let bind_host = std::env::var("COORDINATOR_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("COORDINATOR_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(9999);
    let addr: SocketAddr = format!("{bind_host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind_host}:{port}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind coordinator at {addr}"))?;
    info!("coordinator listening on {addr}");
    info!("commands: <address> on|off|toggle|keep [brightness]");

    let (commands, _) = broadcast::channel::<Frame>(COMMAND_BACKLOG);

    let stdin_commands = commands.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command_line(&line) {
                Ok((address, command)) => {
                    let frame = encode_command(address, &command);
                    match stdin_commands.send(frame) {
                        Ok(gateways) => info!("sent command for {address} to {gateways} gateways"),
                        Err(_) => warn!("no gateway connected, command for {address} dropped"),
                    }
                }
                Err(err) => warn!("{err}"),
            }
        }
    });

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("failed to accept gateway connection")?;
        info!("gateway connected from {peer}");
        let receiver = commands.subscribe();
        tokio::spawn(async move {
            match serve_gateway(stream, receiver).await {
                Ok(()) => info!("gateway {peer} disconnected"),
                Err(err) => warn!("gateway {peer} session failed: {err:#}"),
            }
        });
    }
}

async fn serve_gateway(
    stream: TcpStream,
    mut commands: broadcast::Receiver<Frame>,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut reassembler = FrameReassembler::new();
    let mut chunk = [0u8; 256];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                let read = read.context("gateway read failed")?;
                if read == 0 {
                    return Ok(());
                }
                reassembler.push(&chunk[..read]);
                while let Some(frame) = reassembler.next_frame() {
                    match StateFrame::decode(&frame) {
                        Ok(state) => info!(
                            "{} is {} at {}%",
                            state.address,
                            if state.is_on { "on" } else { "off" },
                            state.brightness
                        ),
                        Err(err) => warn!("ignored state frame: {err}"),
                    }
                }
            }
            command = commands.recv() => match command {
                Ok(frame) => {
                    writer
                        .write_all(&frame)
                        .await
                        .context("gateway write failed")?;
                }
                Err(RecvError::Lagged(skipped)) => warn!("skipped {skipped} commands"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

/// Parses `<address> on|off|toggle|keep [brightness]`.
pub fn parse_command_line(line: &str) -> Result<(DeviceAddress, PendingCommand), String> {
    let mut words = line.split_whitespace();
    let address = words
        .next()
        .ok_or("missing address")?
        .parse::<DeviceAddress>()
        .map_err(|err| format!("bad address: {err}"))?;

    let set_on = match words.next().ok_or("missing action")? {
        "on" => Some(Some(true)),
        "off" => Some(Some(false)),
        "toggle" => None,
        "keep" => Some(None),
        other => return Err(format!("unknown action '{other}'")),
    };

    let brightness = match words.next() {
        Some(word) => match word.parse::<u8>() {
            Ok(level) if level <= 100 => Some(level),
            _ => return Err(format!("brightness must be 0..=100, got '{word}'")),
        },
        None => None,
    };

    let command = match set_on {
        Some(on) => PendingCommand::set(on, brightness),
        None => PendingCommand {
            set_brightness: brightness,
            ..PendingCommand::toggle()
        },
    };
    if !command.has_effect() {
        return Err("'keep' needs a brightness".to_string());
    }
    Ok((address, command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimmer_common::frame::decode_command;

    #[test]
    fn parses_command_lines() {
        let (address, command) = parse_command_line("00:0D:6F:C6:AA:79 on 75").unwrap();
        assert_eq!(address.to_string(), "00:0D:6F:C6:AA:79");
        assert_eq!(command, PendingCommand::set(Some(true), Some(75)));

        let (_, toggle) = parse_command_line("00:0D:6F:C6:AA:79 toggle").unwrap();
        assert_eq!(toggle, PendingCommand::toggle());

        let (_, dim) = parse_command_line("00:0D:6F:C6:AA:79 keep 20").unwrap();
        assert_eq!(dim, PendingCommand::set(None, Some(20)));
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(parse_command_line("").is_err());
        assert!(parse_command_line("00:0D:6F:C6:AA:79").is_err());
        assert!(parse_command_line("00:0D:6F:C6:AA:79 dim").is_err());
        assert!(parse_command_line("00:0D:6F:C6:AA:79 on 300").is_err());
        assert!(parse_command_line("00:0D:6F:C6:AA:79 keep").is_err());
    }

    #[test]
    fn parsed_commands_survive_the_wire() {
        let (address, command) = parse_command_line("00:0D:6F:B3:DF:37 keep 40").unwrap();
        let frame = encode_command(address, &command);
        assert_eq!(decode_command(&frame), Ok((address, command)));
    }

    #[tokio::test]
    async fn relays_commands_and_reads_states() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel::<Frame>(4);
        let receiver = commands.subscribe();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve_gateway(stream, receiver).await
        });

        let mut gateway = TcpStream::connect(addr).await.unwrap();
        let state = StateFrame {
            address: "00:0D:6F:C6:AA:79".parse().unwrap(),
            is_on: true,
            brightness: 50,
        };
        gateway.write_all(&state.encode()).await.unwrap();

        let (address, command) = parse_command_line("00:0D:6F:C6:AA:79 off").unwrap();
        commands.send(encode_command(address, &command)).unwrap();

        let mut frame: Frame = [0; 16];
        gateway.read_exact(&mut frame).await.unwrap();
        assert_eq!(decode_command(&frame), Ok((address, command)));

        drop(gateway);
        assert!(server.await.unwrap().is_ok());
    }
}
