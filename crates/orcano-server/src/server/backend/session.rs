use crate::server::{
    backend::launcher::{BackendProcess, Launcher},
    config::SessionConfig,
    ports::PortAllocator,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use orcano_core::{
    Error, Result,
    protocol::{BackendMessage, Frame, FrameCodec, RawValue, ResponseBuffer, format_inspect},
    storage::FileStore,
};
use std::{net::Ipv4Addr, sync::Arc};
use tokio::{
    net::TcpStream,
    time::{sleep, timeout},
};
use tokio_util::codec::Framed;

/// One live backend instance and its control connection.
///
/// The session owns its port from [`BackendSession::start`] until
/// [`BackendSession::shutdown`], and gives it back only once the process is
/// confirmed dead. Exchanges run strictly one at a time.
pub struct BackendSession<P> {
    port: u16,
    process: P,
    exited: bool,
    conn: Framed<TcpStream, FrameCodec>,
    ports: Arc<PortAllocator>,
    store: Arc<FileStore>,
    config: SessionConfig,
}

impl<P: BackendProcess> BackendSession<P> {
    /// Acquires a port, launches a backend on it and connects to it.
    ///
    /// Connection attempts repeat every `startup_interval` until one succeeds
    /// or `startup_timeout` elapses. On failure the process is killed and the
    /// port returned before the error is reported.
    pub async fn start<L>(
        launcher: &L,
        ports: Arc<PortAllocator>,
        store: Arc<FileStore>,
        config: SessionConfig,
    ) -> Result<Self>
    where
        L: Launcher<Process = P>,
    {
        let port = ports.acquire().await?;
        let mut process = match launcher.launch(port) {
            Ok(process) => process,
            Err(e) => {
                ports.release(port);
                return Err(e.into());
            }
        };

        let mut exited = false;
        let connected = timeout(
            config.startup_timeout,
            connect_with_retry(port, &mut process, &mut exited, config),
        )
        .await;

        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                reap(&mut process, exited, port, &ports).await;
                return Err(e);
            }
            Err(_) => {
                reap(&mut process, exited, port, &ports).await;
                return Err(Error::StartupTimeout {
                    port,
                    timeout: config.startup_timeout,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY on port {port}: {e}");
        }

        tracing::info!(
            "Backend (pid {:?}) accepted control connection on port {port}",
            process.pid()
        );
        Ok(Self {
            port,
            process,
            exited,
            conn: Framed::new(stream, FrameCodec::new()),
            ports,
            store,
            config,
        })
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Runs one request through the backend and returns the assembled
    /// response lines.
    ///
    /// [`Error::Storage`] means the exchange still ran to its terminal
    /// response and the session remains usable. Any other error leaves the
    /// control connection in an unknown state; the caller must shut the
    /// session down.
    pub async fn exchange(&mut self, request: Bytes) -> Result<Bytes> {
        let limit = self.config.exchange_timeout;
        match timeout(limit, self.run_exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ExchangeTimeout(limit)),
        }
    }

    async fn run_exchange(&mut self, request: Bytes) -> Result<Bytes> {
        self.conn.send(Frame::request(request)).await?;

        let mut response = ResponseBuffer::new();
        // Once storage fails, the rest of the exchange is drained without
        // touching the store so no write depends on a value that was never read.
        let mut storage_fault = None;
        loop {
            let frame = self.conn.next().await.ok_or(Error::UnexpectedEof)??;
            match BackendMessage::try_from(frame)? {
                BackendMessage::Response(line) => {
                    return match storage_fault {
                        Some(e) => Err(e),
                        None => {
                            response.push_line(&line);
                            Ok(response.into_bytes())
                        }
                    };
                }
                BackendMessage::AuthQuery { uid, key } => {
                    let accepted = match storage_fault {
                        Some(_) => false,
                        None => match self.store.put_auth_if_absent(uid, key).await {
                            Ok(outcome) => {
                                tracing::debug!("Auth query for uid {uid}: {outcome:?}");
                                outcome.accepted()
                            }
                            Err(e) => {
                                storage_fault = Some(e);
                                false
                            }
                        },
                    };
                    self.conn.send(Frame::auth_answer(accepted)).await?;
                }
                BackendMessage::GetValue(slot) => {
                    let value = match storage_fault {
                        Some(_) => RawValue::ZERO,
                        None => match self.store.get_value(slot).await {
                            Ok(value) => value,
                            Err(e) => {
                                storage_fault = Some(e);
                                RawValue::ZERO
                            }
                        },
                    };
                    self.conn.send(Frame::value_answer(value)).await?;
                }
                BackendMessage::SetValue { slot, value } => {
                    if storage_fault.is_none() {
                        if let Err(e) = self.store.set_value(slot, value).await {
                            storage_fault = Some(e);
                        }
                    }
                }
                BackendMessage::Lock(slot) => {
                    if storage_fault.is_none() {
                        if let Err(e) = self.store.lock(slot).await {
                            storage_fault = Some(e);
                        }
                    }
                }
                BackendMessage::Inspect(values) => {
                    response.push_line(format_inspect(&values).as_bytes());
                }
                BackendMessage::Log(text) => {
                    tracing::info!(
                        port = self.port,
                        "Backend log: {}",
                        String::from_utf8_lossy(&text).trim_end()
                    );
                }
                BackendMessage::Fault(text) => {
                    return Err(Error::BackendReported(
                        String::from_utf8_lossy(&text).trim_end().to_owned(),
                    ));
                }
            }
        }
    }

    /// Resolves when the backend process exits on its own.
    ///
    /// Cancel-safe, so it can be raced against the admission queue while the
    /// worker is idle.
    pub async fn wait_exit(&mut self) -> Error {
        let code = match self.process.wait().await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!("Failed to wait on backend at port {}: {e}", self.port);
                None
            }
        };
        self.exited = true;
        Error::BackendExited { code }
    }

    /// Closes the control connection, kills and reaps the process, then
    /// returns the port.
    pub async fn shutdown(self) {
        let Self {
            port,
            mut process,
            exited,
            conn,
            ports,
            ..
        } = self;
        drop(conn);
        reap(&mut process, exited, port, &ports).await;
    }
}

async fn connect_with_retry<P: BackendProcess>(
    port: u16,
    process: &mut P,
    exited: &mut bool,
    config: SessionConfig,
) -> Result<TcpStream> {
    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
            Ok(stream) => {
                tracing::debug!("Connected to port {port} after {attempts} attempt(s)");
                return Ok(stream);
            }
            Err(e) => tracing::trace!("Connection attempt {attempts} to port {port} failed: {e}"),
        }

        tokio::select! {
            status = process.wait() => {
                *exited = true;
                return Err(Error::BackendExited { code: status.ok().flatten() });
            }
            () = sleep(config.startup_interval) => {}
        }
    }
}

/// Kills (unless already exited) and reaps the process, then releases the
/// port. If the kill fails the port is retired instead of released.
async fn reap<P: BackendProcess>(process: &mut P, exited: bool, port: u16, ports: &PortAllocator) {
    if !exited {
        if let Err(e) = process.kill().await {
            tracing::error!("Failed to kill backend on port {port}, retiring port: {e}");
            return;
        }
    }
    tracing::debug!("Backend on port {port} reaped");
    ports.release(port);
}
