//! Integration tests for the controller server
//!
//! These tests run a real server on a loopback port and talk to it over TCP.

use protocol::{FrameDecoder, Reply, END_OF_COMMAND};
use server::{CommandHandler, DispatchMode, Server, ServerConfig};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

/// Handler call as seen by the application
#[derive(Debug, Clone, PartialEq)]
enum Event {
    Register(usize, String),
    Deregister(usize),
    KeyDown(usize, String, String),
    Joystick(usize, f32, f32),
    Gyro(usize, f32, f32, f32),
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    /// Set while a callback runs, to detect overlapping calls
    busy: Arc<Mutex<bool>>,
    overlapped: Arc<Mutex<bool>>,
}

impl Recorder {
    fn push(&self, event: Event) {
        {
            let mut busy = self.busy.lock().unwrap();
            if *busy {
                *self.overlapped.lock().unwrap() = true;
            }
            *busy = true;
        }
        self.events.lock().unwrap().push(event);
        *self.busy.lock().unwrap() = false;
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl CommandHandler for Recorder {
    fn register(&mut self, player_id: usize, player_name: &str) {
        self.push(Event::Register(player_id, player_name.to_string()));
    }
    fn deregister(&mut self, player_id: usize) {
        self.push(Event::Deregister(player_id));
    }
    fn key_down(&mut self, player_id: usize, key: &str, extra: &str) {
        self.push(Event::KeyDown(player_id, key.to_string(), extra.to_string()));
    }
    fn joystick(&mut self, player_id: usize, x: f32, y: f32) {
        self.push(Event::Joystick(player_id, x, y));
    }
    fn gyro(&mut self, player_id: usize, x: f32, y: f32, z: f32) {
        self.push(Event::Gyro(player_id, x, y, z));
    }
}

fn test_config(max_connections: usize) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_connections,
        ..Default::default()
    }
}

async fn start(max_connections: usize) -> (Server, Recorder) {
    let recorder = Recorder::default();
    let server = Server::bind(test_config(max_connections), recorder.clone())
        .await
        .expect("server should bind");
    (server, recorder)
}

/// Minimal controller speaking the wire protocol
struct Controller {
    stream: TcpStream,
    decoder: FrameDecoder,
    inbox: Vec<String>,
}

impl Controller {
    async fn connect(server: &Server) -> Self {
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(4096),
            inbox: Vec::new(),
        }
    }

    async fn send(&mut self, command: &str) {
        self.send_raw(format!("{command}{END_OF_COMMAND}").as_bytes())
            .await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next framed message, or `None` once the server closed the connection
    async fn recv(&mut self) -> Option<String> {
        let mut buf = [0u8; 256];
        while self.inbox.is_empty() {
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for the server")
                .ok()?;
            if n == 0 {
                return None;
            }
            self.inbox.extend(self.decoder.push(&buf[..n]).unwrap());
        }
        Some(self.inbox.remove(0))
    }

    async fn expect(&mut self, reply: Reply) {
        assert_eq!(self.recv().await, Some(reply.to_string()));
    }

    async fn register(&mut self, name: &str) -> usize {
        self.send(&format!("REGISTER:{name}")).await;
        match self.recv().await.as_deref().and_then(Reply::parse) {
            Some(Reply::PlayerId(id)) => id,
            other => panic!("registration failed: {other:?}"),
        }
    }
}

/// Drains the dispatcher until `count` events were delivered
async fn drain_until(server: &Server, recorder: &Recorder, count: usize) -> Vec<Event> {
    timeout(WAIT, async {
        loop {
            server.run_pending();
            if recorder.events().len() >= count {
                return recorder.events();
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for handler events")
}

/// SLOT ASSIGNMENT TESTS
mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn assigns_lowest_free_slot_and_reuses_it() {
        let (server, recorder) = start(4).await;
        let mut a = Controller::connect(&server).await;
        let mut b = Controller::connect(&server).await;
        let mut c = Controller::connect(&server).await;

        assert_eq!(a.register("a").await, 0);
        assert_eq!(b.register("b").await, 1);

        a.send("DEREGISTER:0").await;
        // no reply, the server just closes the connection
        assert_eq!(a.recv().await, None);

        assert_eq!(c.register("c").await, 0);

        let events = drain_until(&server, &recorder, 4).await;
        assert_eq!(
            events,
            vec![
                Event::Register(0, "a".to_string()),
                Event::Register(1, "b".to_string()),
                Event::Deregister(0),
                Event::Register(0, "c".to_string()),
            ]
        );
        assert_eq!(
            server.players(),
            vec![(0, "c".to_string()), (1, "b".to_string())]
        );
    }

    #[tokio::test]
    async fn full_server_keeps_connection_open() {
        let (server, _recorder) = start(1).await;
        let mut first = Controller::connect(&server).await;
        let mut second = Controller::connect(&server).await;

        assert_eq!(first.register("first").await, 0);
        second.send("REGISTER:second").await;
        second.expect(Reply::ServerFull).await;
        assert_eq!(server.player_count(), 1);

        // still open: later commands are answered
        second.send("9:KEY_DOWN:A").await;
        second.expect(Reply::PlayerNotFound).await;

        first.send("DEREGISTER:0").await;
        assert_eq!(first.recv().await, None);
        assert_eq!(second.register("second").await, 0);
    }

    #[tokio::test]
    async fn deregister_unknown_player() {
        let (server, _recorder) = start(2).await;
        let mut controller = Controller::connect(&server).await;

        controller.send("DEREGISTER:1").await;
        controller.expect(Reply::PlayerNotFound).await;
        controller.send("DEREGISTER:42").await;
        controller.expect(Reply::PlayerNotFound).await;
    }

    #[tokio::test]
    async fn dropped_connection_frees_its_slot() {
        let (server, recorder) = start(2).await;
        let mut controller = Controller::connect(&server).await;
        assert_eq!(controller.register("gone").await, 0);
        drop(controller);

        let events = drain_until(&server, &recorder, 2).await;
        assert_eq!(events[1], Event::Deregister(0));
        assert_eq!(server.player_count(), 0);
    }
}

/// COMMAND VALIDATION TESTS
mod command_tests {
    use super::*;

    #[tokio::test]
    async fn input_commands_reach_the_handler() {
        let (server, recorder) = start(2).await;
        let mut controller = Controller::connect(&server).await;
        let id = controller.register("p").await;

        controller.send(&format!("{id}:JOYSTICK:0.5:-1.0")).await;
        controller.send(&format!("{id}:KEY_DOWN:A")).await;
        controller.send(&format!("{id}:KEY_DOWN:A:shift")).await;
        controller.send(&format!("{id}:GYRO:0:0.25:-0.75")).await;

        let events = drain_until(&server, &recorder, 5).await;
        assert_eq!(
            events[1..],
            [
                Event::Joystick(id, 0.5, -1.0),
                Event::KeyDown(id, "A".to_string(), String::new()),
                Event::KeyDown(id, "A".to_string(), "shift".to_string()),
                Event::Gyro(id, 0.0, 0.25, -0.75),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_commands_are_answered() {
        let (server, recorder) = start(2).await;
        let mut controller = Controller::connect(&server).await;
        let id = controller.register("p").await;

        controller.send(&format!("{id}:JOYSTICK:1.5:0.0")).await;
        controller.expect(Reply::InvalidCommand).await;
        controller.send(&format!("{id}:KEY_DOWN")).await;
        controller.expect(Reply::InvalidCommand).await;
        controller.send(&format!("{id}:GYRO:a:b:c")).await;
        controller.expect(Reply::InvalidCommand).await;
        controller.send("HELLO").await;
        controller.expect(Reply::InvalidCommand).await;
        controller.send("3:JOYSTICK:0:0").await;
        controller.expect(Reply::PlayerNotFound).await;

        server.run_pending();
        assert_eq!(recorder.events(), vec![Event::Register(id, "p".to_string())]);
    }

    #[tokio::test]
    async fn frames_split_and_coalesced_on_the_wire() {
        let (server, recorder) = start(2).await;
        let mut controller = Controller::connect(&server).await;

        controller.send_raw(b"REGI").await;
        sleep(Duration::from_millis(20)).await;
        controller.send_raw(b"STER:split<E").await;
        sleep(Duration::from_millis(20)).await;
        controller.send_raw(b"OC>").await;
        controller.expect(Reply::PlayerId(0)).await;

        controller
            .send_raw(b"0:KEY_DOWN:A<EOC>0:KEY_DOWN:B<EOC>0:KEY_")
            .await;
        sleep(Duration::from_millis(20)).await;
        controller.send_raw(b"DOWN:C<EOC>").await;

        let events = drain_until(&server, &recorder, 4).await;
        let keys: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::KeyDown(_, key, _) => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn immediate_dispatch_skips_the_queue() {
        let recorder = Recorder::default();
        let config = ServerConfig {
            dispatch: DispatchMode::Immediate,
            ..test_config(1)
        };
        let server = Server::bind(config, recorder.clone()).await.unwrap();
        let mut controller = Controller::connect(&server).await;

        controller.register("now").await;
        assert!(server.dispatcher().is_empty());
        assert_eq!(
            recorder.events(),
            vec![Event::Register(0, "now".to_string())]
        );
    }

    #[tokio::test]
    async fn set_handler_redirects_pending_callbacks() {
        let (server, first) = start(1).await;
        let mut controller = Controller::connect(&server).await;
        controller.register("p").await;

        let second = Recorder::default();
        server.set_handler(second.clone());
        server.run_pending();

        assert!(first.events().is_empty());
        assert_eq!(second.events(), vec![Event::Register(0, "p".to_string())]);
    }
}

/// CONCURRENCY AND SHUTDOWN TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_controllers_are_serialised() {
        const PLAYERS: usize = 8;
        const COMMANDS: usize = 25;

        let (server, recorder) = start(PLAYERS).await;
        let server = Arc::new(server);

        let clients: Vec<_> = (0..PLAYERS)
            .map(|i| {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    let mut controller = Controller::connect(&server).await;
                    let id = controller.register(&format!("p{i}")).await;
                    for _ in 0..COMMANDS {
                        controller.send(&format!("{id}:JOYSTICK:0.1:0.2")).await;
                    }
                    (id, controller)
                })
            })
            .collect();

        let mut controllers = Vec::new();
        for client in clients {
            controllers.push(client.await.unwrap());
        }

        let total = PLAYERS * (COMMANDS + 1);
        let events = drain_until(&server, &recorder, total).await;
        assert_eq!(events.len(), total);
        assert!(!*recorder.overlapped.lock().unwrap());

        let mut ids: Vec<usize> = controllers.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..PLAYERS).collect::<Vec<_>>());
        assert_eq!(server.player_count(), PLAYERS);

        for (id, _) in &controllers {
            let joysticks = events
                .iter()
                .filter(|e| matches!(e, Event::Joystick(p, _, _) if p == id))
                .count();
            assert_eq!(joysticks, COMMANDS);
        }
    }

    #[tokio::test]
    async fn shutdown_notifies_players_once() {
        let (server, recorder) = start(2).await;
        let mut a = Controller::connect(&server).await;
        let mut idle = Controller::connect(&server).await;
        a.register("a").await;
        // make sure the second connection is accepted before shutting down
        idle.send("nonsense").await;
        idle.expect(Reply::InvalidCommand).await;

        assert!(server.shutdown());
        assert!(!server.shutdown());
        assert!(server.is_shutting_down());

        a.expect(Reply::ServerShutdown).await;
        assert_eq!(a.recv().await, None);
        // unregistered connections are closed without a notice
        assert_eq!(idle.recv().await, None);

        timeout(WAIT, server.wait()).await.unwrap();
        assert!(TcpStream::connect(server.local_addr()).await.is_err());

        server.run_pending();
        assert_eq!(
            recorder.events(),
            vec![Event::Register(0, "a".to_string()), Event::Deregister(0)]
        );
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let (server, _recorder) = start(1).await;
        let config = ServerConfig {
            port: server.local_addr().port(),
            ..test_config(1)
        };
        assert!(Server::bind(config, Recorder::default()).await.is_err());
    }

    #[tokio::test]
    async fn keep_alive_frames_get_no_reply() {
        let (server, _recorder) = start(1).await;
        let mut controller = Controller::connect(&server).await;

        controller.send("").await;
        controller.send("REGISTER:k").await;
        controller.expect(Reply::PlayerId(0)).await;
    }
}
