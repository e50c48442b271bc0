//! In-process mock Hot Rod server for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hotrod_client::{ClientConfig, ClientConfigBuilder};
use hotrod_core::protocol::buf::{try_read, write_array, write_string, write_vint, write_vlong, ReadError, ReadResult, Reader};
use hotrod_core::protocol::{
    read_media_type, response_opcode, Flags, ADD_BLOOM_FILTER_NEAR_CACHE_LISTENER_REQUEST,
    ADD_CLIENT_LISTENER_REQUEST, AUTH_MECH_LIST_REQUEST, AUTH_REQUEST, CACHE_ENTRY_CREATED_EVENT_RESPONSE,
    CACHE_ENTRY_MODIFIED_EVENT_RESPONSE, CACHE_ENTRY_REMOVED_EVENT_RESPONSE, CLEAR_REQUEST, CONTAINS_KEY_REQUEST,
    ERROR_RESPONSE, EXEC_REQUEST, GET_ALL_REQUEST, GET_REQUEST, INVALID_ITERATION, ITERATION_END_REQUEST,
    ITERATION_NEXT_REQUEST, ITERATION_START_REQUEST, KEY_DOES_NOT_EXIST_STATUS, NOT_EXECUTED_WITH_PREVIOUS,
    NOT_PUT_REMOVED_REPLACED_STATUS, NO_ERROR_STATUS, PING_REQUEST, PUT_ALL_REQUEST, PUT_IF_ABSENT_REQUEST,
    PUT_REQUEST, REMOVE_CLIENT_LISTENER_REQUEST, REMOVE_REQUEST, REPLACE_REQUEST, REQUEST_MAGIC,
    RESPONSE_MAGIC, SERVER_ERROR_STATUS, SIZE_REQUEST, STATS_REQUEST, SUCCESS_WITH_PREVIOUS,
    UNKNOWN_COMMAND_STATUS, UPDATE_BLOOM_FILTER_REQUEST, VERSION_31,
};
use hotrod_core::HotRodError;
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Entries shared by every server of a mock cluster.
pub type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

pub fn new_store() -> Store {
    Arc::new(Mutex::new(HashMap::new()))
}

/// How the server treats the next requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer normally.
    Normal,
    /// Read requests and never answer.
    Silent,
    /// Answer every request with this error status.
    FailWith(u8),
    /// Close the connection instead of answering.
    DropConnection,
    /// Apply the request, then answer with this error status.
    AcceptThenFail(u8),
}

/// Segment ownership the server advertises to hash-aware clients.
#[derive(Debug, Clone)]
pub struct MockTopology {
    pub topology_id: u32,
    pub servers: Vec<SocketAddr>,
    pub num_segments: u32,
}

impl MockTopology {
    /// Owner of segment `s` is `servers[s % servers.len()]`.
    pub fn round_robin(topology_id: u32, servers: Vec<SocketAddr>, num_segments: u32) -> Self {
        Self {
            topology_id,
            servers,
            num_segments,
        }
    }
}

/// One decoded request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub connection: u64,
    pub message_id: u64,
    pub op_code: u8,
    pub cache_name: Bytes,
    pub flags: u32,
    pub intelligence: u8,
    pub topology_id: i32,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Key(Bytes),
    KeyValue(Bytes, Bytes),
    Keys(Vec<Bytes>),
    Entries(Vec<(Bytes, Bytes)>),
    Listener(Bytes),
    BloomListener(Bytes, u32),
    Bitmap(Bytes),
    IterationStart { batch_size: u32 },
    Iteration(String),
    Auth(String, Bytes),
    Exec(String),
    Unsupported,
}

/// A server-side iteration: a snapshot of the store handed out in batches.
struct Iteration {
    batch_size: usize,
    remaining: VecDeque<(Bytes, Bytes)>,
}

struct Registration {
    listener_id: Bytes,
    connection: u64,
    sender: mpsc::UnboundedSender<Bytes>,
}

struct State {
    store: Store,
    behavior: Mutex<Behavior>,
    op_behaviors: Mutex<HashMap<u8, Behavior>>,
    jitter_ms: Mutex<u64>,
    delay_ms: Mutex<u64>,
    topology: Mutex<Option<MockTopology>>,
    requests: Mutex<Vec<MockRequest>>,
    listeners: Mutex<Vec<Registration>>,
    registrations: Mutex<Vec<Bytes>>,
    bloom_updates: Mutex<Vec<Bytes>>,
    iterations: Mutex<HashMap<String, Iteration>>,
    next_iteration: AtomicU64,
    connections: Mutex<CancellationToken>,
    next_connection: AtomicU64,
    next_version: AtomicU64,
}

/// A Hot Rod server on `127.0.0.1` with a random port.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with_store(new_store()).await
    }

    pub async fn start_with_store(store: Store) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            store,
            behavior: Mutex::new(Behavior::Normal),
            op_behaviors: Mutex::new(HashMap::new()),
            jitter_ms: Mutex::new(0),
            delay_ms: Mutex::new(0),
            topology: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            bloom_updates: Mutex::new(Vec::new()),
            iterations: Mutex::new(HashMap::new()),
            next_iteration: AtomicU64::new(1),
            connections: Mutex::new(CancellationToken::new()),
            next_connection: AtomicU64::new(1),
            next_version: AtomicU64::new(1),
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let token = state.connections.lock().child_token();
                let connection = state.next_connection.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(serve(stream, state, token, connection));
            }
        });

        Self { addr, state, accept }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.state.behavior.lock() = behavior;
    }

    /// Overrides the behavior for one request opcode.
    pub fn set_op_behavior(&self, op_code: u8, behavior: Behavior) {
        self.state.op_behaviors.lock().insert(op_code, behavior);
    }

    /// Delays every answer by a random time up to `max`.
    pub fn set_jitter(&self, max: Duration) {
        *self.state.jitter_ms.lock() = max.as_millis() as u64;
    }

    /// Delays every answer by `delay`, on top of any jitter.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay_ms.lock() = delay.as_millis() as u64;
    }

    pub fn set_topology(&self, topology: MockTopology) {
        *self.state.topology.lock() = Some(topology);
    }

    /// Closes every open connection; new ones are still accepted.
    pub fn drop_connections(&self) {
        let mut token = self.state.connections.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Requests received with `op_code`.
    pub fn requests(&self, op_code: u8) -> Vec<MockRequest> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.op_code == op_code)
            .cloned()
            .collect()
    }

    pub fn request_count(&self, op_code: u8) -> usize {
        self.requests(op_code).len()
    }

    /// Opcodes received on each connection, in arrival order.
    pub fn op_codes_by_connection(&self) -> HashMap<u64, Vec<u8>> {
        let mut by_connection: HashMap<u64, Vec<u8>> = HashMap::new();
        for request in self.state.requests.lock().iter() {
            by_connection.entry(request.connection).or_default().push(request.op_code);
        }
        by_connection
    }

    /// Number of connections accepted so far.
    pub fn accepted_connections(&self) -> u64 {
        self.state.next_connection.load(Ordering::Relaxed) - 1
    }

    /// Bloom filter bitmaps received, in order.
    pub fn bloom_updates(&self) -> Vec<Bytes> {
        self.state.bloom_updates.lock().clone()
    }

    /// Iterations started and not yet ended.
    pub fn active_iterations(&self) -> usize {
        self.state.iterations.lock().len()
    }

    /// Listener ids this server ever accepted, in order.
    pub fn registrations(&self) -> Vec<Bytes> {
        self.state.registrations.lock().clone()
    }

    /// Listeners currently registered on a live connection.
    pub fn active_listeners(&self) -> Vec<Bytes> {
        let mut listeners = self.state.listeners.lock();
        listeners.retain(|r| !r.sender.is_closed());
        listeners.iter().map(|r| r.listener_id.clone()).collect()
    }

    pub fn store(&self) -> Store {
        Arc::clone(&self.state.store)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
        self.state.connections.lock().cancel();
    }
}

/// Client config for the given servers with short timeouts.
pub fn config_for(servers: &[SocketAddr]) -> ClientConfigBuilder {
    ClientConfig::builder()
        .servers(servers.iter().copied())
        .connect_timeout(Duration::from_secs(2))
        .socket_timeout(Duration::from_secs(2))
}

/// Sends client logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

async fn serve(stream: TcpStream, state: Arc<State>, token: CancellationToken, connection: u64) {
    let (mut read, mut write) = stream.into_split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<Bytes>();
    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_token.cancelled() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if write.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let mut buf = BytesMut::with_capacity(4096);
    'connection: loop {
        loop {
            match try_read(&buf[..], read_request) {
                Ok(Some((mut request, used))) => {
                    buf.advance(used);
                    request.connection = connection;
                    if !handle(&state, request, &sender, &token, connection) {
                        break 'connection;
                    }
                }
                Ok(None) => break,
                Err(_) => break 'connection,
            }
        }
        tokio::select! {
            _ = token.cancelled() => break,
            read = read.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    token.cancel();
    let _ = writer.await;
    state.listeners.lock().retain(|r| r.connection != connection);
}

/// Handles one request; returns `false` when the connection must close.
fn handle(
    state: &Arc<State>,
    request: MockRequest,
    sender: &mpsc::UnboundedSender<Bytes>,
    token: &CancellationToken,
    connection: u64,
) -> bool {
    state.requests.lock().push(request.clone());
    let behavior = state
        .op_behaviors
        .lock()
        .get(&request.op_code)
        .copied()
        .unwrap_or_else(|| *state.behavior.lock());
    let frame = match behavior {
        Behavior::Silent => return true,
        Behavior::DropConnection => {
            token.cancel();
            return false;
        }
        Behavior::FailWith(status) => error_frame(&request, status, "mock failure"),
        Behavior::AcceptThenFail(status) => {
            answer(state, &request, sender, connection);
            error_frame(&request, status, "mock failure after apply")
        }
        Behavior::Normal => answer(state, &request, sender, connection),
    };

    let jitter = *state.jitter_ms.lock();
    let fixed = *state.delay_ms.lock();
    if jitter == 0 && fixed == 0 {
        let _ = sender.send(frame);
    } else {
        let delay = fixed + rand::thread_rng().gen_range(0..=jitter);
        let sender = sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = sender.send(frame);
        });
    }
    true
}

fn error_frame(request: &MockRequest, status: u8, message: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(RESPONSE_MAGIC);
    write_vlong(&mut buf, request.message_id);
    buf.put_u8(ERROR_RESPONSE);
    buf.put_u8(status);
    buf.put_u8(0);
    write_string(&mut buf, message);
    buf.freeze()
}

fn response_header(state: &State, buf: &mut BytesMut, request: &MockRequest, status: u8) {
    buf.put_u8(RESPONSE_MAGIC);
    write_vlong(buf, request.message_id);
    buf.put_u8(response_opcode(request.op_code));
    buf.put_u8(status);

    let topology = state.topology.lock().clone();
    match topology {
        Some(t) if request.intelligence > 1 && request.topology_id != t.topology_id as i32 => {
            buf.put_u8(1);
            write_vint(buf, t.topology_id);
            write_vint(buf, t.servers.len() as u32);
            for server in &t.servers {
                write_string(buf, &server.ip().to_string());
                buf.put_u16(server.port());
            }
            if request.intelligence == 3 {
                buf.put_u8(3);
                write_vint(buf, t.num_segments);
                for segment in 0..t.num_segments {
                    buf.put_u8(1);
                    write_vint(buf, segment % t.servers.len() as u32);
                }
            }
        }
        _ => buf.put_u8(0),
    }
}

fn answer(
    state: &Arc<State>,
    request: &MockRequest,
    sender: &mpsc::UnboundedSender<Bytes>,
    connection: u64,
) -> Bytes {
    let force_previous = request.flags & Flags::FORCE_RETURN_VALUE.bits() != 0;
    let mut buf = BytesMut::new();

    match (&request.op_code, &request.body) {
        (&PING_REQUEST, _) => {
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            buf.put_u8(0);
            buf.put_u8(0);
            buf.put_u8(VERSION_31);
            write_vint(&mut buf, 0);
        }
        (&GET_REQUEST, RequestBody::Key(key)) => match state.store.lock().get(key) {
            Some(value) => {
                response_header(state, &mut buf, request, NO_ERROR_STATUS);
                write_array(&mut buf, value);
            }
            None => response_header(state, &mut buf, request, KEY_DOES_NOT_EXIST_STATUS),
        },
        (&CONTAINS_KEY_REQUEST, RequestBody::Key(key)) => {
            let status = if state.store.lock().contains_key(key) {
                NO_ERROR_STATUS
            } else {
                KEY_DOES_NOT_EXIST_STATUS
            };
            response_header(state, &mut buf, request, status);
        }
        (&PUT_REQUEST, RequestBody::KeyValue(key, value)) => {
            let previous = state.store.lock().insert(key.clone(), value.clone());
            write_outcome(state, &mut buf, request, NO_ERROR_STATUS, previous.as_ref(), force_previous);
            let event = if previous.is_some() {
                CACHE_ENTRY_MODIFIED_EVENT_RESPONSE
            } else {
                CACHE_ENTRY_CREATED_EVENT_RESPONSE
            };
            notify(state, event, key);
        }
        (&PUT_IF_ABSENT_REQUEST, RequestBody::KeyValue(key, value)) => {
            let existing = {
                let mut store = state.store.lock();
                match store.get(key) {
                    Some(existing) => Some(existing.clone()),
                    None => {
                        store.insert(key.clone(), value.clone());
                        None
                    }
                }
            };
            match existing {
                Some(existing) if force_previous => {
                    response_header(state, &mut buf, request, NOT_EXECUTED_WITH_PREVIOUS);
                    write_array(&mut buf, &existing);
                }
                Some(_) => response_header(state, &mut buf, request, NOT_PUT_REMOVED_REPLACED_STATUS),
                None => {
                    response_header(state, &mut buf, request, NO_ERROR_STATUS);
                    notify(state, CACHE_ENTRY_CREATED_EVENT_RESPONSE, key);
                }
            }
        }
        (&REPLACE_REQUEST, RequestBody::KeyValue(key, value)) => {
            let previous = {
                let mut store = state.store.lock();
                match store.get_mut(key) {
                    Some(slot) => Some(std::mem::replace(slot, value.clone())),
                    None => None,
                }
            };
            match previous {
                Some(previous) => {
                    write_outcome(state, &mut buf, request, NO_ERROR_STATUS, Some(&previous), force_previous);
                    notify(state, CACHE_ENTRY_MODIFIED_EVENT_RESPONSE, key);
                }
                None => response_header(state, &mut buf, request, NOT_PUT_REMOVED_REPLACED_STATUS),
            }
        }
        (&REMOVE_REQUEST, RequestBody::Key(key)) => {
            let previous = state.store.lock().remove(key);
            match previous {
                Some(previous) => {
                    write_outcome(state, &mut buf, request, NO_ERROR_STATUS, Some(&previous), force_previous);
                    notify(state, CACHE_ENTRY_REMOVED_EVENT_RESPONSE, key);
                }
                None => response_header(state, &mut buf, request, KEY_DOES_NOT_EXIST_STATUS),
            }
        }
        (&CLEAR_REQUEST, _) => {
            state.store.lock().clear();
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
        }
        (&SIZE_REQUEST, _) => {
            let size = state.store.lock().len() as u64;
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_vlong(&mut buf, size);
        }
        (&STATS_REQUEST, _) => {
            let size = state.store.lock().len();
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_vint(&mut buf, 1);
            write_string(&mut buf, "currentNumberOfEntries");
            write_string(&mut buf, &size.to_string());
        }
        (&GET_ALL_REQUEST, RequestBody::Keys(keys)) => {
            let found: Vec<(Bytes, Bytes)> = {
                let store = state.store.lock();
                keys.iter()
                    .filter_map(|k| store.get(k).map(|v| (k.clone(), v.clone())))
                    .collect()
            };
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_vint(&mut buf, found.len() as u32);
            for (key, value) in found {
                write_array(&mut buf, &key);
                write_array(&mut buf, &value);
            }
        }
        (&PUT_ALL_REQUEST, RequestBody::Entries(entries)) => {
            let mut store = state.store.lock();
            for (key, value) in entries {
                store.insert(key.clone(), value.clone());
            }
            drop(store);
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
        }
        (&ADD_CLIENT_LISTENER_REQUEST, RequestBody::Listener(listener_id))
        | (&ADD_BLOOM_FILTER_NEAR_CACHE_LISTENER_REQUEST, RequestBody::BloomListener(listener_id, _)) => {
            state.registrations.lock().push(listener_id.clone());
            state.listeners.lock().push(Registration {
                listener_id: listener_id.clone(),
                connection,
                sender: sender.clone(),
            });
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
        }
        (&REMOVE_CLIENT_LISTENER_REQUEST, RequestBody::Listener(listener_id)) => {
            let mut listeners = state.listeners.lock();
            let before = listeners.len();
            listeners.retain(|r| &r.listener_id != listener_id);
            let status = if listeners.len() < before {
                NO_ERROR_STATUS
            } else {
                KEY_DOES_NOT_EXIST_STATUS
            };
            drop(listeners);
            response_header(state, &mut buf, request, status);
        }
        (&UPDATE_BLOOM_FILTER_REQUEST, RequestBody::Bitmap(bitmap)) => {
            state.bloom_updates.lock().push(bitmap.clone());
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
        }
        (&ITERATION_START_REQUEST, RequestBody::IterationStart { batch_size }) => {
            let mut entries: Vec<(Bytes, Bytes)> = state
                .store
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            entries.sort();
            let id = format!("iteration-{}", state.next_iteration.fetch_add(1, Ordering::Relaxed));
            state.iterations.lock().insert(
                id.clone(),
                Iteration {
                    batch_size: (*batch_size).max(1) as usize,
                    remaining: entries.into(),
                },
            );
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_string(&mut buf, &id);
        }
        (&ITERATION_NEXT_REQUEST, RequestBody::Iteration(id)) => {
            let batch = {
                let mut iterations = state.iterations.lock();
                iterations.get_mut(id).map(|iteration| {
                    let take = iteration.batch_size.min(iteration.remaining.len());
                    iteration.remaining.drain(..take).collect::<Vec<_>>()
                })
            };
            let Some(batch) = batch else {
                return error_frame(request, SERVER_ERROR_STATUS, &format!("unknown iteration {id}"));
            };
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_array(&mut buf, &[]);
            write_vint(&mut buf, batch.len() as u32);
            if !batch.is_empty() {
                write_vint(&mut buf, 1);
                for (key, value) in batch {
                    buf.put_u8(0);
                    write_array(&mut buf, &key);
                    write_array(&mut buf, &value);
                }
            }
        }
        (&ITERATION_END_REQUEST, RequestBody::Iteration(id)) => {
            let status = match state.iterations.lock().remove(id) {
                Some(_) => NO_ERROR_STATUS,
                None => INVALID_ITERATION,
            };
            response_header(state, &mut buf, request, status);
        }
        (&AUTH_MECH_LIST_REQUEST, _) => {
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_vint(&mut buf, 2);
            write_string(&mut buf, "SCRAM-SHA-256");
            write_string(&mut buf, "PLAIN");
        }
        (&AUTH_REQUEST, RequestBody::Auth(_, _)) => {
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            buf.put_u8(1);
            write_array(&mut buf, &[]);
        }
        (&EXEC_REQUEST, RequestBody::Exec(task_name)) => {
            response_header(state, &mut buf, request, NO_ERROR_STATUS);
            write_array(&mut buf, task_name.as_bytes());
        }
        _ => {
            return error_frame(
                request,
                UNKNOWN_COMMAND_STATUS,
                &format!("unsupported operation {:#04x}", request.op_code),
            );
        }
    }
    buf.freeze()
}

fn write_outcome(
    state: &State,
    buf: &mut BytesMut,
    request: &MockRequest,
    status: u8,
    previous: Option<&Bytes>,
    force_previous: bool,
) {
    match previous {
        Some(previous) if force_previous => {
            response_header(state, buf, request, SUCCESS_WITH_PREVIOUS);
            write_array(buf, previous);
        }
        _ => response_header(state, buf, request, status),
    }
}

/// Pushes an event about `key` to every registered listener.
fn notify(state: &State, op_code: u8, key: &Bytes) {
    let version = state.next_version.fetch_add(1, Ordering::Relaxed) as i64;
    let mut listeners = state.listeners.lock();
    listeners.retain(|registration| {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_MAGIC);
        write_vlong(&mut buf, 0);
        buf.put_u8(op_code);
        buf.put_u8(NO_ERROR_STATUS);
        buf.put_u8(0);
        write_array(&mut buf, &registration.listener_id);
        buf.put_u8(0);
        buf.put_u8(0);
        write_array(&mut buf, key);
        if op_code != CACHE_ENTRY_REMOVED_EVENT_RESPONSE {
            buf.put_i64(version);
        }
        registration.sender.send(buf.freeze()).is_ok()
    });
}

fn skip_expiration(r: &mut Reader<'_>) -> ReadResult<()> {
    let units = r.read_u8()?;
    for unit in [units >> 4, units & 0x0F] {
        if unit != 0x07 && unit != 0x08 {
            r.read_vlong()?;
        }
    }
    Ok(())
}

fn skip_named_factory(r: &mut Reader<'_>) -> ReadResult<()> {
    let name = r.read_string()?;
    if !name.is_empty() {
        let count = r.read_u8()?;
        for _ in 0..count {
            r.read_array()?;
        }
    }
    Ok(())
}

fn read_request(r: &mut Reader<'_>) -> ReadResult<MockRequest> {
    let magic = r.read_u8()?;
    if magic != REQUEST_MAGIC {
        return Err(ReadError::Invalid(HotRodError::Decode(format!("bad magic {magic:#04x}"))));
    }
    let message_id = r.read_vlong()?;
    let _version = r.read_u8()?;
    let op_code = r.read_u8()?;
    let cache_name = r.read_array()?;
    let flags = r.read_vint()?;
    let intelligence = r.read_u8()?;
    let topology_id = r.read_vint()? as i32;
    read_media_type(r)?;
    read_media_type(r)?;

    let body = match op_code {
        GET_REQUEST | CONTAINS_KEY_REQUEST | REMOVE_REQUEST => RequestBody::Key(r.read_array()?),
        PUT_REQUEST | PUT_IF_ABSENT_REQUEST | REPLACE_REQUEST => {
            let key = r.read_array()?;
            skip_expiration(r)?;
            RequestBody::KeyValue(key, r.read_array()?)
        }
        PING_REQUEST | CLEAR_REQUEST | SIZE_REQUEST | STATS_REQUEST | AUTH_MECH_LIST_REQUEST => RequestBody::Empty,
        GET_ALL_REQUEST => {
            let count = r.read_vint()?;
            let mut keys = Vec::new();
            for _ in 0..count {
                keys.push(r.read_array()?);
            }
            RequestBody::Keys(keys)
        }
        PUT_ALL_REQUEST => {
            skip_expiration(r)?;
            let count = r.read_vint()?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push((r.read_array()?, r.read_array()?));
            }
            RequestBody::Entries(entries)
        }
        ADD_CLIENT_LISTENER_REQUEST => {
            let listener_id = r.read_array()?;
            let _include_current_state = r.read_u8()?;
            skip_named_factory(r)?;
            skip_named_factory(r)?;
            let _raw = r.read_u8()?;
            let _interests = r.read_vint()?;
            RequestBody::Listener(listener_id)
        }
        REMOVE_CLIENT_LISTENER_REQUEST => RequestBody::Listener(r.read_array()?),
        ADD_BLOOM_FILTER_NEAR_CACHE_LISTENER_REQUEST => {
            let listener_id = r.read_array()?;
            RequestBody::BloomListener(listener_id, r.read_vint()?)
        }
        UPDATE_BLOOM_FILTER_REQUEST => RequestBody::Bitmap(r.read_array()?),
        ITERATION_START_REQUEST => {
            r.read_optional_array()?;
            if r.read_optional_string()?.is_some() {
                let count = r.read_u8()?;
                for _ in 0..count {
                    r.read_array()?;
                }
            }
            let batch_size = r.read_vint()?;
            let _metadata = r.read_u8()?;
            RequestBody::IterationStart { batch_size }
        }
        ITERATION_NEXT_REQUEST | ITERATION_END_REQUEST => RequestBody::Iteration(r.read_string()?),
        AUTH_REQUEST => {
            let mechanism = r.read_string()?;
            RequestBody::Auth(mechanism, r.read_array()?)
        }
        EXEC_REQUEST => {
            let task_name = r.read_string()?;
            let count = r.read_vint()?;
            for _ in 0..count {
                r.read_string()?;
                r.read_array()?;
            }
            RequestBody::Exec(task_name)
        }
        _ => RequestBody::Unsupported,
    };

    Ok(MockRequest {
        connection: 0,
        message_id,
        op_code,
        cache_name,
        flags,
        intelligence,
        topology_id,
        body,
    })
}
