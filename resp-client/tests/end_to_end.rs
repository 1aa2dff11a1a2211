use std::sync::mpsc;
use std::time::Duration;

use resp_client::{
    Client, ClientConfig, ClientError, Command, Entity, ErrorKind, MessageHandler, Reply, Subscription,
    SubscriptionTask,
};
use resp_testkit::{init_tracing, TestServer};
use serde::{Deserialize, Serialize};

const WAIT: Duration = Duration::from_secs(2);

fn start() -> TestServer {
    init_tracing();
    TestServer::start().expect("start test server")
}

fn client(server: &TestServer) -> Client {
    Client::connect(server.addr_string()).expect("connect")
}

/// Forwards every subscription event to the test thread.
struct Forward(mpsc::Sender<Event>);

#[derive(Debug, PartialEq)]
enum Event {
    Subscribed(String, i64),
    Unsubscribed(String, i64),
    Message(String, Vec<u8>),
}

impl MessageHandler for Forward {
    fn on_message(&mut self, channel: &str, payload: &[u8]) {
        let _ = self.0.send(Event::Message(channel.to_string(), payload.to_vec()));
    }

    fn on_subscribe(&mut self, channel: &str, count: i64) {
        let _ = self.0.send(Event::Subscribed(channel.to_string(), count));
    }

    fn on_unsubscribe(&mut self, channel: &str, count: i64) {
        let _ = self.0.send(Event::Unsubscribed(channel.to_string(), count));
    }
}

fn message(channel: &str, payload: &str) -> Event {
    Event::Message(channel.to_string(), payload.as_bytes().to_vec())
}

#[test]
fn set_then_get_returns_latest_value() {
    let server = start();
    let mut client = client(&server);
    assert!(client.set("name", "first").expect("set"));
    assert!(client.set("name", "second").expect("set"));
    assert_eq!(client.get_string("name").expect("get"), Some("second".to_string()));
    assert_eq!(client.get("missing").expect("get"), None);
    assert_eq!(client.del(&["name", "missing"]).expect("del"), 1);
    assert_eq!(client.get("name").expect("get"), None);
}

#[test]
fn counters_increase_monotonically() {
    let server = start();
    let mut client = client(&server);
    let mut last = 0;
    let mut expected = 0;
    for delta in [3, 1, 250, 7, 1_000_000] {
        let next = client.incr("counter").expect("incr");
        expected += 1;
        assert!(next > last);
        assert_eq!(next, expected);

        let bumped = client.incr_by("counter", delta).expect("incrby");
        expected += delta;
        assert!(bumped > next);
        assert_eq!(bumped, expected);
        last = bumped;
    }

    // A counter reads back as its decimal text.
    assert_eq!(client.get_i64("counter").expect("get"), Some(expected));
    assert_eq!(client.get_i64("no-counter").expect("get"), None);
}

#[test]
fn non_numeric_value_is_server_error() {
    let server = start();
    let mut client = client(&server);
    client.set("word", "abc").expect("set");
    let err = client.incr("word").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert!(client.ping().is_ok());
}

#[test]
fn transaction_applies_commands_in_order() {
    let server = start();
    let mut client = client(&server);

    let mut tx = client.transaction();
    tx.queue(Command::new("SET").arg("k").arg("1")).expect("queue");
    tx.queue(Command::new("INCRBY").arg("k").arg(2i64)).expect("queue");
    let replies = tx.commit().expect("commit");
    assert_eq!(replies, vec![Reply::ok(), Reply::Integer(3)]);

    assert_eq!(client.get_string("k").expect("get"), Some("3".to_string()));
}

#[test]
fn transaction_is_single_use() {
    let server = start();
    let mut client = client(&server);

    let mut tx = client.transaction();
    tx.queue(Command::new("INCR").arg("n")).expect("queue");
    tx.commit().expect("commit");
    assert!(matches!(tx.commit(), Err(ClientError::Usage(_))));
    assert!(matches!(
        tx.queue(Command::new("INCR").arg("n")),
        Err(ClientError::Usage(_))
    ));

    // The second commit sent nothing.
    assert_eq!(client.get_string("n").expect("get"), Some("1".to_string()));
}

#[test]
fn execution_error_stays_inside_the_batch() {
    let server = start();
    let mut client = client(&server);
    client.rpush("list", &["a"]).expect("rpush");

    let mut tx = client.transaction();
    tx.queue(Command::new("INCR").arg("list")).expect("queue");
    tx.queue(Command::new("INCR").arg("n")).expect("queue");
    let replies = tx.commit().expect("commit");
    assert!(replies[0].is_error());
    assert_eq!(replies[1], Reply::Integer(1));
}

#[test]
fn rejected_command_aborts_the_transaction() {
    let server = start();
    let mut client = client(&server);

    let mut tx = client.transaction();
    tx.queue(Command::new("SET").arg("k").arg("v")).expect("queue");
    tx.queue(Command::new("INCR")).expect("queue");
    let err = tx.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert!(err.to_string().contains("EXECABORT"), "{err}");

    // Nothing was applied and the connection is usable.
    assert_eq!(client.get("k").expect("get"), None);
}

#[test]
fn discarded_transaction_sends_nothing() {
    let server = start();
    let mut client = client(&server);

    let mut tx = client.transaction();
    tx.queue(Command::new("SET").arg("k").arg("v")).expect("queue");
    tx.discard().expect("discard");
    assert!(matches!(tx.commit(), Err(ClientError::Usage(_))));
    assert_eq!(client.get("k").expect("get"), None);
}

#[test]
fn list_view_demo() {
    let server = start();
    let mut client = client(&server);

    let mut list = client.list("tasks");
    list.clear().expect("clear");
    for task in ["write", "review", "ship"] {
        list.push(task).expect("push");
    }
    assert_eq!(list.len().expect("len"), 3);
    assert_eq!(list.strings().expect("strings"), vec!["write", "review", "ship"]);
    list.clear().expect("clear");
    assert!(list.is_empty().expect("is_empty"));

    client.lpush("stack", &["1", "2"]).expect("lpush");
    assert_eq!(
        client.lrange("stack", 0, -1).expect("lrange"),
        vec![b"2".to_vec(), b"1".to_vec()]
    );
    client.ltrim("stack", 0, 0).expect("ltrim");
    assert_eq!(client.llen("stack").expect("llen"), 1);
}

#[test]
fn sets_track_members() {
    let server = start();
    let mut client = client(&server);
    assert_eq!(client.sadd("tags", &["a", "b", "a"]).expect("sadd"), 2);
    assert_eq!(client.srem("tags", &["a", "z"]).expect("srem"), 1);
    assert_eq!(client.smembers("tags").expect("smembers"), vec![b"b".to_vec()]);
}

#[test]
fn subscriber_sees_only_messages_after_confirmation_in_order() {
    let server = start();
    let mut publisher = client(&server);
    assert_eq!(publisher.publish("news", "too early").expect("publish"), 0);

    let (tx, rx) = mpsc::channel();
    let task = SubscriptionTask::spawn(client(&server).into_connection(), &["news"], Forward(tx))
        .expect("spawn");
    assert_eq!(rx.recv_timeout(WAIT).expect("confirmation"), Event::Subscribed("news".into(), 1));

    assert_eq!(publisher.publish("sports", "ignored").expect("publish"), 0);
    for payload in ["one", "two", "three"] {
        assert_eq!(publisher.publish("news", payload).expect("publish"), 1);
    }
    for payload in ["one", "two", "three"] {
        assert_eq!(rx.recv_timeout(WAIT).expect("message"), message("news", payload));
    }

    task.stop().expect("stop");
    assert_eq!(rx.recv_timeout(WAIT).expect("unsubscribe"), Event::Unsubscribed("news".into(), 0));
    task.join().expect("loop ends cleanly");
    assert!(rx.try_recv().is_err());
}

#[test]
fn closure_handler_receives_messages() {
    let server = start();
    let mut publisher = client(&server);

    let (tx, rx) = mpsc::channel();
    let task = SubscriptionTask::spawn(
        client(&server).into_connection(),
        &["a", "b"],
        move |channel: &str, payload: &[u8]| {
            let _ = tx.send(format!("{channel}:{}", String::from_utf8_lossy(payload)));
        },
    )
    .expect("spawn");

    // Both confirmations are in once a publish to "b" reaches a subscriber.
    while publisher.publish("b", "ready").expect("publish") == 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(publisher.publish("a", "x").expect("publish"), 1);
    assert_eq!(rx.recv_timeout(WAIT).expect("ready"), "b:ready");
    assert_eq!(rx.recv_timeout(WAIT).expect("message"), "a:x");

    task.canceller().unsubscribe(&["a"]).expect("unsubscribe a");
    while publisher.publish("a", "late").expect("publish") != 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!task.is_finished());
    task.cancel().expect("cancel");
    task.join().expect("cancelled loop ends cleanly");
}

#[test]
fn subscribed_connection_returns_after_unsubscribe() {
    let server = start();
    let mut publisher = client(&server);
    let mut subscription = Subscription::new(client(&server).into_connection()).expect("subscription");
    let canceller = subscription.canceller();

    let (tx, rx) = mpsc::channel();
    let mut handler = Forward(tx);
    std::thread::scope(|scope| {
        scope.spawn(move || {
            assert_eq!(rx.recv_timeout(WAIT).expect("confirmation"), Event::Subscribed("jobs".into(), 1));
            assert_eq!(publisher.publish("jobs", "build").expect("publish"), 1);
            assert_eq!(rx.recv_timeout(WAIT).expect("message"), message("jobs", "build"));
            canceller.unsubscribe_all().expect("unsubscribe");
        });
        subscription
            .subscribe_to_channels(&["jobs"], &mut handler)
            .expect("loop");
    });

    assert_eq!(subscription.channels().count(), 0);
    let conn = subscription.into_connection().expect("nothing subscribed");
    let mut client = Client::from_connection(conn);
    assert_eq!(client.ping().expect("ping"), b"PONG");
}

#[test]
fn closed_subscription_reports_later_failures() {
    let server = start();
    let mut subscription = Subscription::new(client(&server).into_connection()).expect("subscription");
    let canceller = subscription.canceller();

    let (tx, rx) = mpsc::channel();
    let mut handler = Forward(tx);
    std::thread::scope(|scope| {
        scope.spawn(move || {
            assert_eq!(rx.recv_timeout(WAIT).expect("confirmation"), Event::Subscribed("news".into(), 1));
            canceller.close().expect("close");
        });
        subscription
            .subscribe_to_channels(&["news"], &mut handler)
            .expect("closed loop ends cleanly");
    });
    assert_eq!(subscription.channels().count(), 0);

    // The close ended the first loop only; the dead connection is reported.
    let err = subscription
        .subscribe_to_channels(&["other"], &mut handler)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(subscription.channels().count(), 0);
}

#[test]
fn stop_right_after_spawn_ends_the_loop() {
    let server = start();
    let (tx, rx) = mpsc::channel();
    let task = SubscriptionTask::spawn(client(&server).into_connection(), &["news"], Forward(tx))
        .expect("spawn");
    task.stop().expect("stop");

    assert_eq!(rx.recv_timeout(WAIT).expect("confirmation"), Event::Subscribed("news".into(), 1));
    assert_eq!(rx.recv_timeout(WAIT).expect("unsubscribe"), Event::Unsubscribed("news".into(), 0));
    task.join().expect("loop ends cleanly");
}

#[test]
fn server_shutdown_ends_subscription_with_connection_error() {
    let server = start();
    let (tx, rx) = mpsc::channel();
    let task = SubscriptionTask::spawn(client(&server).into_connection(), &["news"], Forward(tx))
        .expect("spawn");
    rx.recv_timeout(WAIT).expect("confirmation");

    server.stop();
    let err = task.join().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[test]
fn dropping_a_task_cancels_it() {
    let server = start();
    let mut publisher = client(&server);
    let (tx, rx) = mpsc::channel();
    let task = SubscriptionTask::spawn(client(&server).into_connection(), &["news"], Forward(tx))
        .expect("spawn");
    rx.recv_timeout(WAIT).expect("confirmation");

    drop(task);
    // The subscriber connection is gone once the server processes the close.
    while publisher.publish("news", "anyone?").expect("publish") != 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Hero {
    id: i64,
    name: String,
    power: u32,
}

impl Entity for Hero {
    const TYPE_NAME: &'static str = "Hero";

    fn id(&self) -> i64 {
        self.id
    }
}

#[test]
fn typed_records_round_trip() {
    let server = start();
    let mut client = client(&server);

    let mut heroes = client.typed::<Hero>();
    let first = heroes.get_next_sequence().expect("sequence");
    let second = heroes.get_next_sequence().expect("sequence");
    assert_eq!((first, second), (1, 2));

    let hero = Hero {
        id: first,
        name: "Ada".to_string(),
        power: 9,
    };
    heroes.store(&hero).expect("store");
    heroes
        .store(&Hero {
            id: second,
            name: "Grace".to_string(),
            power: 7,
        })
        .expect("store");

    assert_eq!(heroes.get_by_id(first).expect("get"), Some(hero));
    assert_eq!(heroes.get_by_id(99).expect("get"), None);
    assert_eq!(heroes.ids().expect("ids"), vec![1, 2]);

    assert!(heroes.delete_by_id(second).expect("delete"));
    assert!(!heroes.delete_by_id(second).expect("delete again"));
    assert_eq!(heroes.ids().expect("ids"), vec![1]);

    assert!(client.get("urn:Hero:1").expect("raw").is_some());
    assert_eq!(client.get_string("seq:Hero").expect("seq"), Some("2".to_string()));
}

#[test]
fn corrupt_record_is_serialization_error() {
    let server = start();
    let mut client = client(&server);
    client.set("urn:Hero:5", "not json").expect("set");
    let err = client.typed::<Hero>().get_by_id(5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);
}

#[test]
fn config_from_url_connects() {
    let server = start();
    let config = ClientConfig::from_url(&format!("redis://{}", server.addr_string())).expect("url");
    let mut client = Client::with_config(config).expect("connect");
    assert_eq!(client.ping().expect("ping"), b"PONG");
}
