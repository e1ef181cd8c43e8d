#![allow(dead_code)]

use bytes::Bytes;
use core::{ops::Range, time::Duration};
use futures::{SinkExt, StreamExt};
use orcano_core::{
    protocol::{Frame, FrameCodec, RawValue, Tag, Value},
    storage::FileStore,
};
use orcano_server::server::{
    backend::{BackendProcess, Launcher},
    client::PROMPT,
    config::{ClientConfig, PoolConfig, SessionConfig},
    frontend::serve,
    pool::{SlotStatus, WorkerContext, WorkerPool},
    ports::PortAllocator,
    queue::AdmissionQueue,
};
use std::{
    collections::HashSet,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::{codec::Framed, sync::CancellationToken};

type Conn = Framed<TcpStream, FrameCodec>;

/// Ports of fake backends that have been launched and not yet reaped.
#[derive(Clone, Default)]
pub struct LiveBackends {
    ports: Arc<Mutex<HashSet<u16>>>,
    launches: Arc<Mutex<Vec<u16>>>,
    conflicts: Arc<Mutex<Vec<u16>>>,
}

impl LiveBackends {
    pub fn launches(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn live(&self) -> usize {
        self.ports.lock().unwrap().len()
    }

    pub fn conflicts(&self) -> Vec<u16> {
        self.conflicts.lock().unwrap().clone()
    }
}

/// Runs a scripted backend on a Tokio task instead of spawning a process.
pub struct FakeLauncher {
    pub live: LiveBackends,
}

pub struct FakeProcess {
    port: u16,
    task: JoinHandle<()>,
    exit: Option<Option<i32>>,
    live: LiveBackends,
}

impl Launcher for FakeLauncher {
    type Process = FakeProcess;

    fn launch(&self, port: u16) -> io::Result<FakeProcess> {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        if !self.live.ports.lock().unwrap().insert(port) {
            self.live.conflicts.lock().unwrap().push(port);
        }
        self.live.launches.lock().unwrap().push(port);
        Ok(FakeProcess {
            port,
            task: tokio::spawn(fake_backend(listener)),
            exit: None,
            live: self.live.clone(),
        })
    }
}

impl FakeProcess {
    fn reaped(&mut self, code: Option<i32>) -> Option<i32> {
        if self.exit.is_none() {
            self.exit = Some(code);
            self.live.ports.lock().unwrap().remove(&self.port);
        }
        code
    }
}

impl BackendProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        self.exit.is_none().then_some(u32::from(self.port))
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(code) = self.exit {
            return Ok(code);
        }
        let code = match (&mut self.task).await {
            Ok(()) => Some(0),
            Err(_) => None,
        };
        Ok(self.reaped(code))
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.task.abort();
        self.wait().await.map(|_| ())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Flow {
    Continue,
    Exit,
}

/// Accepts the control connection and serves requests until told to exit.
///
/// Request lines are `<command> <args...>`:
/// `user <uid> <key>`, `set <uid> <idx> <value>`, `lock <uid> <idx>`,
/// `get <uid> <idx>`, `inspect <values...>`, `log <text>`, `fail`, `hang`,
/// `crash` (exit mid-request) and `quit` (answer, then exit).
async fn fake_backend(listener: TcpListener) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    drop(listener);

    let mut conn = Framed::new(stream, FrameCodec::new());
    while let Some(Ok(frame)) = conn.next().await {
        if frame.tag != Tag::REQUEST {
            return;
        }
        let line = String::from_utf8_lossy(&frame.payload).into_owned();
        match run_command(&mut conn, &line).await {
            Some(Flow::Continue) => {}
            Some(Flow::Exit) | None => return,
        }
    }
}

async fn run_command(conn: &mut Conn, line: &str) -> Option<Flow> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let reply = match words.as_slice() {
        ["user", uid, key] => {
            let mut payload = uid.parse::<u32>().ok()?.to_be_bytes().to_vec();
            let mut key_bytes = [b'_'; 4];
            for (dst, src) in key_bytes.iter_mut().zip(key.bytes()) {
                *dst = src;
            }
            payload.extend_from_slice(&key_bytes);
            conn.send(Frame::new(Tag::AUTH_QUERY, payload)).await.ok()?;

            let answer = conn.next().await?.ok()?;
            if answer.tag == Tag::AUTH_ANSWER && answer.payload[..] == 1_u32.to_be_bytes() {
                "out: i1".to_owned()
            } else {
                "error: key mismatch".to_owned()
            }
        }
        ["set", uid, idx, value] => {
            let value = parse_value(value)?;
            let mut payload = slot(uid, idx)?;
            payload.extend_from_slice(value.encode().as_bytes());
            conn.send(Frame::new(Tag::SET_VALUE, payload)).await.ok()?;
            format!("out: {value}")
        }
        ["lock", uid, idx] => {
            conn.send(Frame::new(Tag::LOCK, slot(uid, idx)?)).await.ok()?;
            "out: i1".to_owned()
        }
        ["get", uid, idx] => {
            conn.send(Frame::new(Tag::GET_VALUE, slot(uid, idx)?))
                .await
                .ok()?;
            let answer = conn.next().await?.ok()?;
            if answer.tag != Tag::VALUE_ANSWER {
                return None;
            }
            match RawValue::from_slice(&answer.payload)?.decode() {
                Ok(value) => format!("out: {value}"),
                Err(_) => "error: bad value".to_owned(),
            }
        }
        ["inspect", values @ ..] => {
            let mut payload = i32::try_from(values.len()).ok()?.to_be_bytes().to_vec();
            for value in values {
                payload.extend_from_slice(parse_value(value)?.encode().as_bytes());
            }
            conn.send(Frame::new(Tag::INSPECT, payload)).await.ok()?;
            "out: i0".to_owned()
        }
        ["log", text @ ..] => {
            conn.send(Frame::new(Tag::LOG, text.join(" ").into_bytes()))
                .await
                .ok()?;
            "out: i0".to_owned()
        }
        ["fail"] => {
            conn.send(Frame::new(Tag::ERROR, &b"illegal instruction"[..]))
                .await
                .ok()?;
            return Some(Flow::Continue);
        }
        ["hang"] => core::future::pending().await,
        ["crash"] => return Some(Flow::Exit),
        ["quit"] => {
            respond(conn, "out: i0").await?;
            return Some(Flow::Exit);
        }
        _ => "error: unknown command".to_owned(),
    };

    respond(conn, &reply).await?;
    Some(Flow::Continue)
}

async fn respond(conn: &mut Conn, line: &str) -> Option<()> {
    let payload = Bytes::from(format!("{line}\n"));
    conn.send(Frame::new(Tag::RESPONSE, payload)).await.ok()
}

fn slot(uid: &str, idx: &str) -> Option<Vec<u8>> {
    let mut out = uid.parse::<u64>().ok()?.to_be_bytes().to_vec();
    out.extend_from_slice(&idx.parse::<u32>().ok()?.to_be_bytes());
    Some(out)
}

fn parse_value(text: &str) -> Option<Value> {
    if text.contains(['.', 'e']) {
        text.parse().ok().map(Value::Float)
    } else {
        text.parse().ok().map(Value::Int)
    }
}

/// A frontend listening on an ephemeral port, backed by fake backends.
pub struct Frontend {
    pub addr: SocketAddr,
    pub pool: WorkerPool,
    pub live: LiveBackends,
    pub store: Arc<FileStore>,
    shutdown: CancellationToken,
    supervisor: JoinHandle<()>,
    _dir: TempDir,
}

impl Frontend {
    pub async fn start(num_workers: usize, ports: Range<u16>) -> Self {
        Self::start_with(num_workers, ports, 64).await
    }

    pub async fn start_with(num_workers: usize, ports: Range<u16>, queue_capacity: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let live = LiveBackends::default();

        let session = SessionConfig {
            exchange_timeout: Duration::from_millis(300),
            startup_timeout: Duration::from_secs(2),
            startup_interval: Duration::from_millis(10),
        };
        let pool_config = PoolConfig {
            num_workers,
            ports: ports.clone(),
            restart_backoff: Duration::ZERO,
            session,
        };

        let (queue, source) = AdmissionQueue::new(queue_capacity);
        let ctx = WorkerContext {
            launcher: FakeLauncher { live: live.clone() },
            ports: Arc::new(PortAllocator::new(ports)),
            store: Arc::clone(&store),
            queue: source,
            session,
        };
        let shutdown = CancellationToken::new();
        let (pool, supervisor) = WorkerPool::spawn(&pool_config, ctx, shutdown.clone());

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = ClientConfig {
            max_request_size: 64,
            idle_timeout: Duration::from_secs(10),
        };
        tokio::spawn(serve(listener, queue, client, shutdown.clone()));

        Self {
            addr,
            pool,
            live,
            store,
            shutdown,
            supervisor,
            _dir: dir,
        }
    }

    pub fn states(&self) -> Vec<SlotStatus> {
        self.pool.states()
    }

    pub fn restarts(&self) -> u64 {
        self.states().iter().map(|s| s.restarts).sum()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.supervisor)
            .await
            .unwrap()
            .unwrap();
    }
}

/// A connected client that has consumed the greeting and first prompt.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        };
        let greeting = client.read_response().await;
        assert_eq!(greeting, "Hey! Listen!\n");
        client
    }

    /// Sends one line and returns everything up to (not including) the next
    /// prompt.
    pub async fn send(&mut self, line: &str) -> String {
        self.stream
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        self.read_response().await
    }

    pub async fn read_response(&mut self) -> String {
        let mut out = Vec::new();
        let mut byte = [0; 1];
        while !out.ends_with(PROMPT) {
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut byte))
                .await
                .expect("response timed out")
                .unwrap();
            assert_ne!(n, 0, "connection closed after {:?}", String::from_utf8_lossy(&out));
            out.push(byte[0]);
        }
        out.truncate(out.len() - PROMPT.len());
        String::from_utf8(out).unwrap()
    }

    /// Sends an empty line and waits for the server to close the connection.
    pub async fn close(mut self) {
        self.stream.write_all(b"\n").await.unwrap();
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
