//! Shared scripted servers, factories and listeners for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use ldap_resilience::connection::{
    BindRequest, Connection, ConnectionEventListener, ConnectionFactory, ConnectionStateTracker, LdapError,
    LdapResult, Request, Response,
};
use ldap_resilience::load_balancer::LoadBalancerEventListener;
use ldap_resilience::scheduler::{OnceTask, ScheduledTask, Scheduler, Task, TimeService};

/// How a scripted server answers a class of requests.
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond,
    Delay(Duration),
    Hang,
    Fail(LdapError),
}

/// A request as seen by a scripted server.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub operation: &'static str,
    pub at: Instant,
}

/// A scripted directory server. Searches follow the heartbeat behavior,
/// every other request follows the operation behavior.
pub struct MockServer {
    pub name: String,
    heartbeat: Mutex<Behavior>,
    operations: Mutex<Behavior>,
    connect_error: Mutex<Option<LdapError>>,
    log: Mutex<Vec<LoggedRequest>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    connects: AtomicUsize,
    factory_closes: AtomicUsize,
}

impl MockServer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            heartbeat: Mutex::new(Behavior::Respond),
            operations: Mutex::new(Behavior::Respond),
            connect_error: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            factory_closes: AtomicUsize::new(0),
        })
    }

    pub fn set_heartbeat(&self, behavior: Behavior) {
        *self.heartbeat.lock().unwrap() = behavior;
    }

    pub fn set_operations(&self, behavior: Behavior) {
        *self.operations.lock().unwrap() = behavior;
    }

    /// Make connection attempts fail with `error`, or succeed again with `None`.
    pub fn set_connect_error(&self, error: Option<LdapError>) {
        *self.connect_error.lock().unwrap() = error;
    }

    pub fn log(&self) -> Vec<LoggedRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.log().iter().filter(|r| r.operation == operation).count()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn factory_closes(&self) -> usize {
        self.factory_closes.load(Ordering::SeqCst)
    }

    /// Raw connections handed out so far.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn ConnectionFactory> {
        Arc::new(MockFactory {
            server: Arc::clone(self),
        })
    }
}

/// Raw connection to a [`MockServer`].
pub struct MockConnection {
    server: Arc<MockServer>,
    state: ConnectionStateTracker,
    closes: AtomicUsize,
}

impl MockConnection {
    /// Simulate the server dropping the connection.
    pub fn disconnect(&self, error: LdapError) {
        self.state.notify_connection_error(true, &error);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.state.listener_count()
    }
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockConnection({})", self.server.name)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, request: Request) -> LdapResult<Response> {
        if self.state.is_closed() {
            return Err(LdapError::closed_by_client());
        }
        if let Some(error) = self.state.connection_error() {
            return Err(error);
        }

        self.server.log.lock().unwrap().push(LoggedRequest {
            operation: request.operation_name(),
            at: Instant::now(),
        });

        let behavior = match request {
            Request::Search(_) => self.server.heartbeat.lock().unwrap().clone(),
            _ => self.server.operations.lock().unwrap().clone(),
        };
        match behavior {
            Behavior::Respond => Ok(Response::success()),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Response::success())
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail(error) => Err(error),
        }
    }

    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn close(&self) {
        if self.state.notify_connection_closed() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn add_connection_event_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.state.add_listener(listener);
    }

    fn remove_connection_event_listener(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.state.remove_listener(listener);
    }
}

/// Factory producing connections to a [`MockServer`].
pub struct MockFactory {
    server: Arc<MockServer>,
}

impl std::fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockFactory({})", self.server.name)
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn get_connection(&self) -> LdapResult<Arc<dyn Connection>> {
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.server.connect_error.lock().unwrap().clone() {
            return Err(error);
        }
        let connection = Arc::new(MockConnection {
            server: Arc::clone(&self.server),
            state: ConnectionStateTracker::new(),
            closes: AtomicUsize::new(0),
        });
        self.server.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }

    fn close(&self) {
        self.server.factory_closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records load balancer events as `(event, factory)` pairs.
#[derive(Default)]
pub struct RecordingBalancerListener {
    events: Mutex<Vec<(&'static str, String, Option<String>)>>,
}

impl RecordingBalancerListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(&'static str, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(event, factory, _)| (*event, factory.clone()))
            .collect()
    }

    /// Error messages passed with offline events.
    pub fn offline_errors(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, _, error)| error.clone())
            .collect()
    }
}

impl LoadBalancerEventListener for RecordingBalancerListener {
    fn handle_connection_factory_offline(&self, factory: &Arc<dyn ConnectionFactory>, error: &LdapError) {
        self.events
            .lock()
            .unwrap()
            .push(("offline", format!("{:?}", factory), Some(error.to_string())));
    }

    fn handle_connection_factory_online(&self, factory: &Arc<dyn ConnectionFactory>) {
        self.events
            .lock()
            .unwrap()
            .push(("online", format!("{:?}", factory), None));
    }
}

/// Records connection events.
#[derive(Default)]
pub struct RecordingConnectionListener {
    closed: AtomicUsize,
    errors: Mutex<Vec<(bool, LdapError)>>,
}

impl RecordingConnectionListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<(bool, LdapError)> {
        self.errors.lock().unwrap().clone()
    }
}

impl ConnectionEventListener for RecordingConnectionListener {
    fn handle_connection_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_connection_error(&self, is_disconnect_notification: bool, error: &LdapError) {
        self.errors
            .lock()
            .unwrap()
            .push((is_disconnect_notification, error.clone()));
    }
}

/// Scheduler that runs tasks only when told to, on whatever thread asks.
///
/// Cancellation is not tracked: handles it returns are already cancelled.
#[derive(Default)]
pub struct ManualScheduler {
    periodic: Mutex<Vec<(Duration, Task)>>,
    once: Mutex<Vec<OnceTask>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Periods of the periodic tasks scheduled so far.
    pub fn periods(&self) -> Vec<Duration> {
        self.periodic.lock().unwrap().iter().map(|(period, _)| *period).collect()
    }

    /// Run every periodic task once.
    pub fn run_periodic(&self) {
        let tasks: Vec<Task> = self.periodic.lock().unwrap().iter().map(|(_, task)| task.clone()).collect();
        for task in tasks {
            task();
        }
    }

    /// Run and forget every one-shot task.
    pub fn run_once_tasks(&self) {
        let tasks = std::mem::take(&mut *self.once.lock().unwrap());
        for task in tasks {
            task();
        }
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("periodic", &self.periods())
            .finish_non_exhaustive()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at_fixed_rate(&self, period: Duration, task: Task) -> ScheduledTask {
        self.periodic.lock().unwrap().push((period, task));
        ScheduledTask::cancelled()
    }

    fn schedule_once(&self, _delay: Duration, task: OnceTask) -> ScheduledTask {
        self.once.lock().unwrap().push(task);
        ScheduledTask::cancelled()
    }
}

/// Clock that only moves when told to, whichever thread reads it.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl TimeService for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

/// Run `f` on a fresh OS thread, outside any runtime.
pub fn on_foreign_thread<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(f).join().unwrap();
}

pub fn search(base: &str) -> Request {
    Request::Search(ldap_resilience::connection::SearchRequest::new(
        base,
        ldap_resilience::connection::SearchScope::WholeSubtree,
        "(objectClass=*)",
    ))
}

pub fn simple_bind(name: &str) -> Request {
    Request::Bind(BindRequest::Simple {
        name: name.to_string(),
        password: "secret".to_string(),
    })
}

pub fn delete(name: &str) -> Request {
    Request::Delete {
        name: name.to_string(),
    }
}
