//! Acceptor slot selection and registration, driven by mock reactors and listeners.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use wsmux::reactor::{EventHandler, Interest, Reactor, ReactorPool, ReactorSlot, SocketId};
use wsmux::transport::{AsSocketId, Listener};
use wsmux::{Acceptor, Error, PoolConfig, Result, ServiceFactory};

const LISTENER_ID: SocketId = SocketId(1000);
const PRIMARY: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Wake(usize),
    Handover(usize, SocketId),
}

type Journal = Arc<Mutex<Vec<Event>>>;

struct MockReactor {
    index: usize,
    journal: Journal,
    handlers: Mutex<HashMap<SocketId, Box<dyn EventHandler>>>,
}

impl MockReactor {
    fn new(index: usize, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            index,
            journal: Arc::clone(journal),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// Run the handler of `socket` as the event loop would.
    fn fire(&self, socket: SocketId) {
        let handler = self.handlers.lock().remove(&socket);
        if let Some(mut handler) = handler {
            handler.readable();
            self.handlers.lock().entry(socket).or_insert(handler);
        }
    }
}

impl Reactor for MockReactor {
    fn register(
        &self,
        socket: SocketId,
        _interest: Interest,
        handler: Box<dyn EventHandler>,
    ) -> Result<()> {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(&socket) {
            return Err(Error::Io(ErrorKind::AlreadyExists, socket.to_string()));
        }
        handlers.insert(socket, handler);
        Ok(())
    }

    fn modify(&self, socket: SocketId, _interest: Interest) -> Result<()> {
        if self.has(socket) {
            Ok(())
        } else {
            Err(Error::Io(ErrorKind::NotFound, socket.to_string()))
        }
    }

    fn unregister(&self, socket: SocketId) -> Result<()> {
        self.handlers
            .lock()
            .remove(&socket)
            .map(drop)
            .ok_or_else(|| Error::Io(ErrorKind::NotFound, socket.to_string()))
    }

    fn has(&self, socket: SocketId) -> bool {
        self.handlers.lock().contains_key(&socket)
    }

    fn wake(&self) -> Result<()> {
        self.journal.lock().push(Event::Wake(self.index));
        Ok(())
    }
}

struct MockSocket(SocketId);

impl AsSocketId for MockSocket {
    fn socket_id(&self) -> SocketId {
        self.0
    }
}

/// Hands out sockets 1, 2, 3, ...
#[derive(Default)]
struct MockListener {
    next: AtomicU64,
    fail_next: AtomicBool,
}

impl MockListener {
    /// Id the next successful accept returns.
    fn peek(&self) -> SocketId {
        SocketId(self.next.load(Ordering::SeqCst) + 1)
    }
}

impl AsSocketId for MockListener {
    fn socket_id(&self) -> SocketId {
        LISTENER_ID
    }
}

impl Listener for MockListener {
    type Stream = MockSocket;

    fn accept(&self) -> io::Result<MockSocket> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(ErrorKind::ConnectionAborted, "aborted"));
        }
        Ok(MockSocket(SocketId(self.next.fetch_add(1, Ordering::SeqCst) + 1)))
    }
}

struct Recorder {
    journal: Journal,
    accepted: Vec<(SocketId, usize)>,
}

impl ServiceFactory<MockSocket> for Recorder {
    fn create_handler(&mut self, socket: MockSocket, slot: &ReactorSlot) -> Result<()> {
        self.journal
            .lock()
            .push(Event::Handover(slot.index(), socket.socket_id()));
        self.accepted.push((socket.socket_id(), slot.index()));
        Ok(())
    }
}

struct Fixture {
    journal: Journal,
    workers: Arc<Mutex<Vec<Arc<MockReactor>>>>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            journal: Arc::default(),
            workers: Arc::default(),
        }
    }

    fn acceptor(
        &self,
        size: usize,
        primary: Option<Arc<dyn Reactor>>,
    ) -> Result<Arc<Acceptor<MockListener, Recorder>>> {
        let journal = Arc::clone(&self.journal);
        let workers = Arc::clone(&self.workers);
        Acceptor::new(
            MockListener::default(),
            &PoolConfig::new(size),
            move |index, _name| {
                let reactor = MockReactor::new(index, &journal);
                workers.lock().push(Arc::clone(&reactor));
                Ok(reactor as Arc<dyn Reactor>)
            },
            Recorder {
                journal: Arc::clone(&self.journal),
                accepted: Vec::new(),
            },
            primary,
        )
    }

    fn worker(&self, index: usize) -> Arc<MockReactor> {
        Arc::clone(&self.workers.lock()[index])
    }
}

#[test]
fn test_round_robin_distribution() {
    for size in 1..=5 {
        let fixture = Fixture::new();
        let acceptor = fixture.acceptor(size, None).unwrap();
        let total = 3 * size + 2;

        for k in 0..total {
            assert_eq!(acceptor.on_accept().unwrap(), k % size);
            assert!(acceptor.cursor() < size);
        }

        let mut counts = vec![0; size];
        acceptor.with_factory(|f| {
            for &(_, slot) in &f.accepted {
                counts[slot] += 1;
            }
        });
        let (low, high) = (total / size, total.div_ceil(size));
        assert!(counts.iter().all(|&c| c == low || c == high), "{counts:?}");
    }
}

#[test]
fn test_affinity_reuses_slot_without_advancing() {
    let fixture = Fixture::new();
    let acceptor = fixture.acceptor(3, None).unwrap();

    let next = acceptor.listener().peek();
    fixture
        .worker(2)
        .register(next, Interest::READABLE, Box::new(|| {}))
        .unwrap();

    assert_eq!(acceptor.on_accept().unwrap(), 2);
    assert_eq!(acceptor.cursor(), 0);
    assert_eq!(acceptor.on_accept().unwrap(), 0);
    assert_eq!(acceptor.cursor(), 1);
}

#[test]
fn test_worker_woken_before_handover() {
    let fixture = Fixture::new();
    let acceptor = fixture.acceptor(2, None).unwrap();

    acceptor.on_accept().unwrap();
    acceptor.on_accept().unwrap();

    assert_eq!(
        *fixture.journal.lock(),
        vec![
            Event::Wake(0),
            Event::Handover(0, SocketId(1)),
            Event::Wake(1),
            Event::Handover(1, SocketId(2)),
        ]
    );
}

#[test]
fn test_zero_pool_size_rejected() {
    let fixture = Fixture::new();
    assert_eq!(fixture.acceptor(0, None).unwrap_err(), Error::InvalidPoolSize(0));
}

#[test]
fn test_reactor_factory_sees_indices_and_names() {
    let mut seen = Vec::new();
    let journal = Journal::default();
    let pool = ReactorPool::new(&PoolConfig::new(3).with_thread_name("io"), |index, name| {
        seen.push((index, name.to_string()));
        Ok(MockReactor::new(index, &journal) as Arc<dyn Reactor>)
    })
    .unwrap();

    assert_eq!(pool.len(), 3);
    assert_eq!(
        seen,
        vec![
            (0, "io#0".to_string()),
            (1, "io#1".to_string()),
            (2, "io#2".to_string())
        ]
    );
}

#[test]
fn test_reactor_factory_error_propagates() {
    let result = ReactorPool::new(&PoolConfig::new(2), |index, _| {
        if index == 1 {
            Err(Error::Io(ErrorKind::Other, "no more loops".into()))
        } else {
            Ok(MockReactor::new(index, &Journal::default()) as Arc<dyn Reactor>)
        }
    });
    assert!(matches!(result, Err(Error::Io(ErrorKind::Other, _))));
}

#[test]
fn test_failed_accept_leaves_acceptor_usable() {
    let fixture = Fixture::new();
    let acceptor = fixture.acceptor(2, None).unwrap();

    acceptor.listener().fail_next.store(true, Ordering::SeqCst);
    let err = acceptor.on_accept().unwrap_err();
    assert_eq!(err.io_kind(), Some(ErrorKind::ConnectionAborted));
    assert_eq!(acceptor.cursor(), 0);

    assert_eq!(acceptor.on_accept().unwrap(), 0);
}

#[test]
fn test_primary_drives_accepts() {
    let fixture = Fixture::new();
    let primary = MockReactor::new(PRIMARY, &fixture.journal);
    let acceptor = fixture
        .acceptor(2, Some(Arc::clone(&primary) as Arc<dyn Reactor>))
        .unwrap();
    assert!(primary.has(LISTENER_ID));
    assert!(acceptor.is_registered());

    primary.fire(LISTENER_ID);
    primary.fire(LISTENER_ID);

    acceptor.with_factory(|f| {
        assert_eq!(f.accepted, vec![(SocketId(1), 0), (SocketId(2), 1)]);
    });
    assert_eq!(fixture.journal.lock()[0], Event::Wake(PRIMARY));
}

#[test]
fn test_failed_accept_from_primary_is_swallowed() {
    let fixture = Fixture::new();
    let primary = MockReactor::new(PRIMARY, &fixture.journal);
    let acceptor = fixture
        .acceptor(1, Some(Arc::clone(&primary) as Arc<dyn Reactor>))
        .unwrap();

    acceptor.listener().fail_next.store(true, Ordering::SeqCst);
    primary.fire(LISTENER_ID);
    assert!(primary.has(LISTENER_ID));
    acceptor.with_factory(|f| assert!(f.accepted.is_empty()));
}

#[test]
fn test_registration_is_idempotent() {
    let fixture = Fixture::new();
    let first = MockReactor::new(PRIMARY, &fixture.journal);
    let second = MockReactor::new(PRIMARY - 1, &fixture.journal);
    let acceptor = fixture.acceptor(1, None).unwrap();
    assert!(!acceptor.is_registered());

    acceptor.unregister().unwrap();

    acceptor
        .register_with(Arc::clone(&first) as Arc<dyn Reactor>)
        .unwrap();
    acceptor
        .register_with(Arc::clone(&first) as Arc<dyn Reactor>)
        .unwrap();
    assert!(first.has(LISTENER_ID));

    acceptor
        .register_with(Arc::clone(&second) as Arc<dyn Reactor>)
        .unwrap();
    assert!(!first.has(LISTENER_ID));
    assert!(second.has(LISTENER_ID));

    acceptor.unregister().unwrap();
    acceptor.unregister().unwrap();
    assert!(!second.has(LISTENER_ID));
    assert!(!acceptor.is_registered());
}

#[test]
fn test_drop_unregisters_listener() {
    let fixture = Fixture::new();
    let primary = MockReactor::new(PRIMARY, &fixture.journal);
    let acceptor = fixture
        .acceptor(1, Some(Arc::clone(&primary) as Arc<dyn Reactor>))
        .unwrap();
    assert!(primary.has(LISTENER_ID));

    drop(acceptor);
    assert!(!primary.has(LISTENER_ID));
}

struct Pinned(Vec<SocketId>);

impl ServiceFactory<MockSocket> for Pinned {
    fn create_handler(&mut self, socket: MockSocket, _slot: &ReactorSlot) -> Result<()> {
        self.0.push(socket.socket_id());
        Ok(())
    }

    fn select_slot(&mut self, _socket: SocketId, pool: &mut ReactorPool) -> usize {
        pool.len() - 1
    }
}

#[test]
fn test_custom_slot_selection() {
    let journal = Journal::default();
    let acceptor = Acceptor::new(
        MockListener::default(),
        &PoolConfig::new(4),
        |index, _| Ok(MockReactor::new(index, &journal) as Arc<dyn Reactor>),
        Pinned(Vec::new()),
        None,
    )
    .unwrap();

    assert_eq!(acceptor.on_accept().unwrap(), 3);
    assert_eq!(acceptor.on_accept().unwrap(), 3);
    assert_eq!(acceptor.cursor(), 0);
    acceptor.with_factory(|f| assert_eq!(f.0.len(), 2));
}
