//! Heartbeat connection behavior against scripted servers, on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use ldap_resilience::connection::{Connection, ConnectionFactory, LdapError, ResultCode};
use ldap_resilience::heartbeat::{HeartbeatConnectionFactory, HeartbeatOptions};
use tokio::time::Instant;

mod common;
use common::{
    delete, on_foreign_thread, simple_bind, Behavior, ManualClock, ManualScheduler, MockServer, RecordingConnectionListener,
};

const INTERVAL: Duration = Duration::from_secs(5);
const TIMEOUT: Duration = Duration::from_millis(100);

fn heartbeat_factory(server: &Arc<MockServer>) -> HeartbeatConnectionFactory {
    HeartbeatConnectionFactory::with_options(server.factory(), HeartbeatOptions::new(INTERVAL, TIMEOUT))
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_invalidates_connection() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();
    let listener = RecordingConnectionListener::new();
    connection.add_connection_event_listener(listener.clone());
    assert_eq!(server.count("search"), 1, "initial heartbeat");

    // First idle period: heartbeat at 5s answered at once.
    sleep_ms(5050).await;
    assert_eq!(server.count("search"), 2);
    assert!(connection.is_valid());

    // Second idle period: heartbeat at 10s never answered.
    server.set_heartbeat(Behavior::Hang);
    sleep_ms(5000).await;
    assert_eq!(server.count("search"), 3);
    assert!(connection.is_valid(), "valid before the timeout elapses");

    sleep_ms(100).await;
    assert!(!connection.is_valid());

    let errors = listener.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1.to_string(), LdapError::heartbeat_timeout(TIMEOUT).to_string());

    // Fails fast from now on.
    let requests_before = server.log().len();
    let err = connection.execute(delete("cn=x")).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideServerDown);
    assert_eq!(server.log().len(), requests_before);

    sleep_ms(20_000).await;
    assert!(!connection.is_valid(), "never becomes valid again");
    assert_eq!(listener.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_heartbeat_answer_is_due_again_next_tick() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    // Heartbeat at 5s answered at 5.01s.
    server.set_heartbeat(Behavior::Delay(Duration::from_millis(10)));
    sleep_ms(5050).await;
    assert_eq!(server.count("search"), 2);
    assert!(connection.is_valid());

    // The tick at 10s still finds the connection idle long enough.
    server.set_heartbeat(Behavior::Hang);
    sleep_ms(4960).await;
    assert_eq!(server.count("search"), 3);

    sleep_ms(140).await;
    assert!(!connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_pending_bind_suppresses_heartbeat() {
    let server = MockServer::new("s0");
    server.set_operations(Behavior::Delay(Duration::from_millis(80)));
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    sleep_ms(4950).await;
    let binding = Arc::clone(&connection);
    let bind = tokio::spawn(async move { binding.execute(simple_bind("cn=admin")).await });

    // Tick at 5s finds the bind pending; the bind answers at 5.03s, inside the deadline.
    sleep_ms(250).await;
    assert_eq!(server.count("search"), 1);
    bind.await.unwrap().unwrap();
    assert!(connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_bind_result_resets_idle_timer() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    sleep_ms(5050).await;
    assert_eq!(server.count("search"), 2);

    // Bind answered at 8s; the tick at 10s sees only 2s of idleness.
    sleep_ms(2950).await;
    connection.execute(simple_bind("cn=admin")).await.unwrap();
    sleep_ms(2100).await;
    assert_eq!(server.count("search"), 2);

    // Tick at 15s.
    sleep_ms(5000).await;
    assert_eq!(server.count("search"), 3);
    assert!(connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_server_silent_during_bind_invalidates_connection() {
    let server = MockServer::new("s0");
    server.set_operations(Behavior::Hang);
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();
    let listener = RecordingConnectionListener::new();
    connection.add_connection_event_listener(listener.clone());

    sleep_ms(4990).await;
    let binding = Arc::clone(&connection);
    let bind = tokio::spawn(async move { binding.execute(simple_bind("cn=admin")).await });

    // Tick at 5s: the bind stands in for the heartbeat.
    sleep_ms(20).await;
    assert_eq!(server.count("search"), 1);
    assert!(connection.is_valid());

    // Deadline check at 5.1s.
    sleep_ms(100).await;
    assert!(!connection.is_valid());
    let err = bind.await.unwrap().unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideServerDown);
    assert_eq!(listener.errors().len(), 1);

    sleep_ms(60_000).await;
    assert_eq!(server.count("search"), 1);
    assert_eq!(listener.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bind_waits_for_in_flight_heartbeat() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();
    let start = Instant::now();

    server.set_heartbeat(Behavior::Delay(Duration::from_millis(50)));
    sleep_ms(5010).await;

    let binding = Arc::clone(&connection);
    let bind = tokio::spawn(async move { binding.execute(simple_bind("cn=admin")).await });
    sleep_ms(10).await;
    assert_eq!(server.count("bind"), 0, "queued behind the heartbeat");

    bind.await.unwrap().unwrap();
    let sent = server.log().into_iter().find(|r| r.operation == "bind").unwrap();
    let waited = sent.at - start;
    assert!(waited >= Duration::from_millis(5050), "bind sent at {waited:?}");
    assert!(waited < Duration::from_millis(5100), "bind sent at {waited:?}");
    assert!(connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_queued_bind_fails_when_heartbeat_times_out() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    server.set_heartbeat(Behavior::Hang);
    sleep_ms(5010).await;

    let err = connection.execute(simple_bind("cn=admin")).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideServerDown);
    assert_eq!(server.count("bind"), 0);
    assert!(!connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_traffic_keeps_connection_quiet() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    for _ in 0..4 {
        sleep_ms(3000).await;
        connection.execute(delete("cn=x")).await.unwrap();
    }
    sleep_ms(500).await;

    assert_eq!(server.count("search"), 1, "only the initial heartbeat");
    assert_eq!(server.count("delete"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_server_result_to_heartbeat_counts_as_alive() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    server.set_heartbeat(Behavior::Fail(LdapError::from_result(ResultCode::Busy, "busy")));
    sleep_ms(10_500).await;

    assert_eq!(server.count("search"), 3);
    assert!(connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_connection_error_invalidates() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();

    server.set_heartbeat(Behavior::Fail(LdapError::server_down("reset by peer")));
    sleep_ms(5010).await;

    assert!(!connection.is_valid());
    let err = connection.execute(delete("cn=x")).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideServerDown);
    assert_eq!(err.cause().unwrap().to_string(), "Server down: reset by peer");
}

#[tokio::test(start_paused = true)]
async fn test_initial_heartbeat_failure_is_the_cause() {
    let server = MockServer::new("s0");
    server.set_heartbeat(Behavior::Fail(LdapError::server_down("no route")));
    let factory = heartbeat_factory(&server);

    let err = factory.get_connection().await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideConnectError);
    assert_eq!(err.cause().unwrap().to_string(), "Server down: no route");
    assert_eq!(server.connections()[0].close_count(), 1);
    assert_eq!(factory.active_connections(), 0);
    assert!(!factory.is_ticking());

    server.set_heartbeat(Behavior::Hang);
    let err = factory.get_connection().await.unwrap_err();
    assert_eq!(
        err.cause().unwrap().to_string(),
        LdapError::heartbeat_timeout(TIMEOUT).to_string()
    );
    assert_eq!(server.connections()[1].close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_stops_ticking() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();
    let listener = RecordingConnectionListener::new();
    connection.add_connection_event_listener(listener.clone());
    assert!(factory.is_ticking());
    assert_eq!(factory.active_connections(), 1);

    connection.close();
    connection.close();

    assert!(connection.is_closed());
    assert!(!connection.is_valid());
    assert_eq!(listener.closed(), 1);
    assert!(listener.errors().is_empty());

    let raw = &server.connections()[0];
    assert_eq!(raw.close_count(), 1);
    assert_eq!(raw.listener_count(), 0);
    assert_eq!(factory.active_connections(), 0);
    assert!(!factory.is_ticking());

    let err = connection.execute(delete("cn=x")).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideUserCancelled);

    sleep_ms(20_000).await;
    assert_eq!(server.count("search"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_heartbeat_result_after_close_is_ignored() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();
    let listener = RecordingConnectionListener::new();
    connection.add_connection_event_listener(listener.clone());

    server.set_heartbeat(Behavior::Delay(Duration::from_millis(50)));
    sleep_ms(5010).await;
    connection.close();
    sleep_ms(1000).await;

    assert!(connection.is_closed());
    assert!(listener.errors().is_empty());
    assert_eq!(listener.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_raw_disconnect_is_relayed() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let connection = factory.get_connection().await.unwrap();
    let listener = RecordingConnectionListener::new();
    connection.add_connection_event_listener(listener.clone());

    server.connections()[0].disconnect(LdapError::from_result(ResultCode::Other(80), "transport gone"));

    assert!(!connection.is_valid());
    let errors = listener.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0);
    assert_eq!(errors[0].1.result_code(), ResultCode::ClientSideServerDown);

    let err = connection.execute(delete("cn=x")).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideServerDown);
    assert_eq!(err.cause().unwrap().result_code(), ResultCode::Other(80));

    // Invalid connections are skipped by the idle tick.
    sleep_ms(10_500).await;
    assert_eq!(server.count("search"), 1);
}

#[tokio::test]
async fn test_ticks_fired_outside_the_runtime() {
    let server = MockServer::new("s0");
    let scheduler = ManualScheduler::new();
    let clock = ManualClock::new();
    let factory = HeartbeatConnectionFactory::with_options(
        server.factory(),
        HeartbeatOptions::new(INTERVAL, TIMEOUT)
            .with_scheduler(scheduler.clone())
            .with_time_service(clock.clone()),
    );
    let connection = factory.get_connection().await.unwrap();
    assert_eq!(scheduler.periods(), vec![INTERVAL]);

    server.set_heartbeat(Behavior::Hang);
    clock.advance(INTERVAL);
    let ticker = scheduler.clone();
    on_foreign_thread(move || ticker.run_periodic());
    sleep_ms(10).await;
    assert_eq!(server.count("search"), 2);
    assert!(connection.is_valid());

    clock.advance(TIMEOUT);
    let checker = scheduler.clone();
    on_foreign_thread(move || checker.run_once_tasks());
    assert!(!connection.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_factory_close_rejects_new_connections() {
    let server = MockServer::new("s0");
    let factory = heartbeat_factory(&server);
    let _connection = factory.get_connection().await.unwrap();

    factory.close();
    factory.close();

    assert_eq!(server.factory_closes(), 1);
    assert!(!factory.is_ticking());
    let err = factory.get_connection().await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientSideConnectError);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_factories_behind_a_balancer() {
    use ldap_resilience::load_balancer::{new_round_robin_load_balancer, LoadBalancerOptions};

    let servers: Vec<_> = (0..2).map(|i| MockServer::new(&format!("s{i}"))).collect();
    servers[0].set_heartbeat(Behavior::Hang);
    let delegates: Vec<Arc<dyn ConnectionFactory>> = servers
        .iter()
        .map(|s| Arc::new(heartbeat_factory(s)) as Arc<dyn ConnectionFactory>)
        .collect();
    let lb = new_round_robin_load_balancer(delegates, LoadBalancerOptions::default());

    // s0 never answers its initial heartbeat, so s1 serves.
    let connection = lb.get_connection().await.unwrap();
    connection.execute(delete("cn=x")).await.unwrap();
    assert_eq!(servers[1].count("delete"), 1);
    assert!(!lb.delegates()[0].is_online());
}
