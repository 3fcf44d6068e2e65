use dashmap::DashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::registry::ProviderRecord;

const HELP: &str = "Supported commands:\n  ls       list provider and consumer services\n  version  show facade version\n  help     show this message\n  quit     close the connection\n";

/// QoS 端口展示的运行时信息
#[derive(Debug, Default)]
pub(crate) struct QosState {
    // interface:version -> 提供者记录
    pub(crate) providers: DashMap<String, ProviderRecord>,
    // interface:version -> 解析时的提供者数量
    pub(crate) consumers: DashMap<String, usize>,
}

impl QosState {
    fn render_ls(&self) -> String {
        let mut providers: Vec<String> = self
            .providers
            .iter()
            .map(|entry| {
                let record = entry.value();
                format!("{} {} {}", entry.key(), record.protocol, record.address())
            })
            .collect();
        providers.sort();

        let mut consumers: Vec<String> = self
            .consumers
            .iter()
            .map(|entry| format!("{} providers={}", entry.key(), entry.value()))
            .collect();
        consumers.sort();

        let mut out = String::from("As Provider side:\n");
        for line in providers {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str("As Consumer side:\n");
        for line in consumers {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// 在 127.0.0.1 上启动 QoS 服务
pub(crate) async fn start(
    port: u16,
    state: Arc<QosState>,
    task_tracker: &TaskTracker,
    shutdown: CancellationToken,
) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let local_addr = listener.local_addr()?;

    let tracker = task_tracker.clone();
    task_tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Accepted QoS connection");
                        let state = state.clone();
                        let shutdown = shutdown.clone();
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, state, shutdown).await {
                                tracing::debug!(peer = %peer, error = %e, "QoS connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept QoS connection");
                    }
                },
            }
        }
    });

    Ok(local_addr)
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<QosState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let response = match line.trim() {
            "" => continue,
            "ls" => state.render_ls(),
            "help" => HELP.to_string(),
            "version" => format!("{}\n", env!("CARGO_PKG_VERSION")),
            "quit" | "exit" => {
                writer.write_all(b"BYE!\n").await?;
                writer.shutdown().await?;
                return Ok(());
            }
            other => format!("Unsupported command: {other}\n"),
        };

        writer.write_all(response.as_bytes()).await?;
    }
}
