//! In-process scripted Bolt server for integration tests.
//!
//! Speaks just enough 5.4 to exercise the driver: handshake, HELLO/LOGON,
//! auto-commit and explicit transactions, FAILURE/IGNORED/RESET semantics,
//! and a configurable run of transient failures.

#![allow(dead_code)]

use activecypher::packstream::{self, Structure, Value, ValueMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const SIG_HELLO: u8 = 0x01;
const SIG_GOODBYE: u8 = 0x02;
const SIG_RESET: u8 = 0x0F;
const SIG_RUN: u8 = 0x10;
const SIG_BEGIN: u8 = 0x11;
const SIG_COMMIT: u8 = 0x12;
const SIG_ROLLBACK: u8 = 0x13;
const SIG_DISCARD: u8 = 0x2F;
const SIG_PULL: u8 = 0x3F;
const SIG_ROUTE: u8 = 0x66;
const SIG_LOGON: u8 = 0x6A;

const SIG_SUCCESS: u8 = 0x70;
const SIG_RECORD: u8 = 0x71;
const SIG_IGNORED: u8 = 0x7E;
const SIG_FAILURE: u8 = 0x7F;

#[derive(Default, Clone)]
pub struct MockOptions {
    /// Require these basic credentials on LOGON.
    pub expected_basic: Option<(String, String)>,
    /// `FLAKY` statements fail with a transient error this many times.
    pub flaky_failures: usize,
    /// Answer every COMMIT with a transient FAILURE.
    pub fail_commit: bool,
}

pub struct MockServer {
    pub addr: SocketAddr,
    /// Total connections accepted.
    pub connections: Arc<AtomicUsize>,
    /// Remaining transient failures for `FLAKY` statements.
    pub flaky_remaining: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let flaky_remaining = Arc::new(AtomicUsize::new(options.flaky_failures));

        let conn_counter = connections.clone();
        let flaky = flaky_remaining.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                conn_counter.fetch_add(1, Ordering::SeqCst);
                let options = options.clone();
                let flaky = flaky.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, options, flaky).await;
                });
            }
        });

        Self {
            addr,
            connections,
            flaky_remaining,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("bolt://{}", self.addr)
    }

    pub fn url_with_auth(&self, user: &str, password: &str) -> String {
        format!("bolt://{user}:{password}@{}", self.addr)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    options: MockOptions,
    flaky: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    // Handshake: magic + four proposals, answered with 5.4.
    let mut opening = [0u8; 20];
    stream.read_exact(&mut opening).await?;
    assert_eq!(&opening[..4], &[0x60, 0x60, 0xB0, 0x17], "bad magic");
    stream.write_all(&[0, 0, 4, 5]).await?;

    let mut failed = false;
    let mut in_tx = false;
    let mut last_query: Option<(String, ValueMap)> = None;

    loop {
        let Some(message) = read_message(&mut stream).await? else {
            return Ok(());
        };
        let Value::Structure(Structure { signature, fields }) =
            packstream::decode_exact(&message).expect("client sent undecodable message")
        else {
            panic!("client sent a non-structure message");
        };

        if failed && signature != SIG_RESET && signature != SIG_GOODBYE {
            write_ignored(&mut stream).await?;
            continue;
        }

        match signature {
            SIG_HELLO => {
                write_success(
                    &mut stream,
                    Value::map([
                        ("server", Value::String("Neo4j/5.13.0".into())),
                        ("connection_id", Value::String("bolt-1".into())),
                    ]),
                )
                .await?;
            }
            SIG_LOGON => {
                let auth = fields.first().and_then(Value::as_map).cloned().unwrap_or_default();
                let ok = match &options.expected_basic {
                    None => true,
                    Some((user, password)) => {
                        auth.get("principal").and_then(Value::as_str) == Some(user)
                            && auth.get("credentials").and_then(Value::as_str) == Some(password)
                    }
                };
                if ok {
                    write_success(&mut stream, Value::Map(ValueMap::new())).await?;
                } else {
                    failed = true;
                    write_failure(
                        &mut stream,
                        "Neo.ClientError.Security.Unauthorized",
                        "The client is unauthorized due to authentication failure.",
                    )
                    .await?;
                }
            }
            SIG_RESET => {
                failed = false;
                in_tx = false;
                last_query = None;
                write_success(&mut stream, Value::Map(ValueMap::new())).await?;
            }
            SIG_GOODBYE => return Ok(()),
            SIG_BEGIN => {
                in_tx = true;
                write_success(&mut stream, Value::Map(ValueMap::new())).await?;
            }
            SIG_COMMIT => {
                in_tx = false;
                if options.fail_commit {
                    failed = true;
                    write_failure(
                        &mut stream,
                        "Neo.TransientError.General.TransientError",
                        "commit outcome unknown",
                    )
                    .await?;
                    continue;
                }
                write_success(
                    &mut stream,
                    Value::map([("bookmark", Value::String("bm-commit-1".into()))]),
                )
                .await?;
            }
            SIG_ROLLBACK => {
                in_tx = false;
                write_success(&mut stream, Value::Map(ValueMap::new())).await?;
            }
            SIG_RUN => {
                let query = fields
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let params = fields.get(1).and_then(Value::as_map).cloned().unwrap_or_default();

                if query.contains("SYNTAX") {
                    failed = true;
                    write_failure(
                        &mut stream,
                        "Neo.ClientError.Statement.SyntaxError",
                        "Invalid input",
                    )
                    .await?;
                    continue;
                }
                if query.contains("FLAKY") {
                    let stole = flaky
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                    if stole {
                        failed = true;
                        write_failure(
                            &mut stream,
                            "Neo.TransientError.General.TransientError",
                            "try again",
                        )
                        .await?;
                        continue;
                    }
                }

                let meta = Value::map([("fields", field_names(&query))]);
                write_success(&mut stream, meta).await?;
                last_query = Some((query, params));
            }
            SIG_PULL | SIG_DISCARD => {
                let records = match last_query.take() {
                    Some((query, params)) if signature == SIG_PULL => run_records(&query, &params),
                    _ => Vec::new(),
                };
                for record in records {
                    write_record(&mut stream, record).await?;
                }
                let mut meta = ValueMap::new();
                meta.insert("type".into(), Value::String("r".into()));
                if !in_tx {
                    meta.insert("bookmark".into(), Value::String("bm-auto-1".into()));
                }
                write_success(&mut stream, Value::Map(meta)).await?;
            }
            SIG_ROUTE => {
                write_success(
                    &mut stream,
                    Value::map([(
                        "rt",
                        Value::map([("ttl", Value::Int(300)), ("servers", Value::List(vec![]))]),
                    )]),
                )
                .await?;
            }
            other => panic!("mock server got unexpected signature 0x{other:02X}"),
        }
    }
}

fn field_names(query: &str) -> Value {
    let names: Vec<Value> = if query.contains("AS total") {
        vec![Value::String("total".into())]
    } else if query.contains("UNWIND") {
        vec![Value::String("n".into())]
    } else if query.contains("FLAKY") {
        vec![Value::String("v".into())]
    } else if query.contains("RETURN 1") {
        vec![Value::String("1".into())]
    } else {
        vec![]
    };
    Value::List(names)
}

fn run_records(query: &str, params: &ValueMap) -> Vec<Vec<Value>> {
    if query.contains("AS total") {
        let x = params.get("x").and_then(Value::as_int).unwrap_or(0);
        let y = params.get("y").and_then(Value::as_int).unwrap_or(0);
        return vec![vec![Value::Int(x + y)]];
    }
    if query.contains("UNWIND") {
        return vec![
            vec![Value::Int(1)],
            vec![Value::Int(2)],
            vec![Value::Int(3)],
        ];
    }
    if query.contains("FLAKY") {
        return vec![vec![Value::Int(42)]];
    }
    if query.contains("RETURN 1") {
        return vec![vec![Value::Int(1)]];
    }
    Vec::new()
}

async fn read_message(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut message = Vec::new();
    loop {
        let mut header = [0u8; 2];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u16::from_be_bytes(header) as usize;
        if len == 0 {
            if message.is_empty() {
                continue;
            }
            return Ok(Some(message));
        }
        let start = message.len();
        message.resize(start + len, 0);
        stream.read_exact(&mut message[start..]).await?;
    }
}

async fn write_message(stream: &mut TcpStream, value: &Value) -> std::io::Result<()> {
    let bytes = packstream::encode_to_vec(value).expect("mock message encodes");
    for chunk in bytes.chunks(0xFFFF) {
        stream.write_all(&(chunk.len() as u16).to_be_bytes()).await?;
        stream.write_all(chunk).await?;
    }
    stream.write_all(&[0, 0]).await?;
    stream.flush().await
}

async fn write_success(stream: &mut TcpStream, meta: Value) -> std::io::Result<()> {
    write_message(
        stream,
        &Value::Structure(Structure::new(SIG_SUCCESS, vec![meta])),
    )
    .await
}

async fn write_failure(stream: &mut TcpStream, code: &str, msg: &str) -> std::io::Result<()> {
    let meta = Value::map([
        ("code", Value::String(code.into())),
        ("message", Value::String(msg.into())),
    ]);
    write_message(
        stream,
        &Value::Structure(Structure::new(SIG_FAILURE, vec![meta])),
    )
    .await
}

async fn write_ignored(stream: &mut TcpStream) -> std::io::Result<()> {
    write_message(stream, &Value::Structure(Structure::new(SIG_IGNORED, vec![]))).await
}

async fn write_record(stream: &mut TcpStream, values: Vec<Value>) -> std::io::Result<()> {
    write_message(
        stream,
        &Value::Structure(Structure::new(SIG_RECORD, vec![Value::List(values)])),
    )
    .await
}
