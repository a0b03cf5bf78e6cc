//! Controller lifecycle, send serialization, and pacing behavior

use async_trait::async_trait;
use jogkit_core::ConsoleListener;
use jogkit_link::pacer::PacerConfig;
use jogkit_link::transport::{LinkParams, LinkPort, SerialLink};
use jogkit_link::DeviceController;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared fake port: tests feed `incoming` and inspect `writes`.
///
/// Each `write_all` call is recorded as one fragment, so byte-level
/// interleaving between concurrent writers would be visible.
#[derive(Clone, Default)]
struct FakeWire {
    incoming: Arc<Mutex<VecDeque<u8>>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeWire {
    fn feed(&self, bytes: &[u8]) {
        self.incoming.lock().unwrap().extend(bytes.iter().copied());
    }

    fn written_stream(&self) -> Vec<u8> {
        self.writes.lock().unwrap().concat()
    }

    fn written_lines(&self) -> Vec<String> {
        let stream = self.written_stream();
        String::from_utf8_lossy(&stream)
            .split('\n')
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()
    }

    fn port(&self) -> Box<dyn LinkPort> {
        Box::new(FakePort { wire: self.clone() })
    }
}

struct FakePort {
    wire: FakeWire,
}

impl LinkPort for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.wire.incoming.lock().unwrap();
        if incoming.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let mut n = 0;
        while n < buf.len() {
            match incoming.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.wire.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.wire.incoming.lock().unwrap().clear();
        Ok(())
    }
}

/// Listener capturing everything published to the console.
struct CaptureListener {
    received: Arc<Mutex<Vec<String>>>,
    faults: Arc<Mutex<Vec<String>>>,
}

impl CaptureListener {
    fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let faults = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                received: received.clone(),
                faults: faults.clone(),
            }),
            received,
            faults,
        )
    }
}

#[async_trait]
impl ConsoleListener for CaptureListener {
    async fn on_line_received(&self, line: &str) {
        self.received.lock().unwrap().push(line.to_string());
    }

    async fn on_fault(&self, message: &str) {
        self.faults.lock().unwrap().push(message.to_string());
    }
}

fn attached_controller(wire: &FakeWire) -> DeviceController {
    let controller = DeviceController::default();
    controller
        .attach(SerialLink::from_port(wire.port(), LinkParams::new("fake")))
        .unwrap();
    controller
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_interleave() {
    let wire = FakeWire::default();
    let controller = Arc::new(attached_controller(&wire));

    let commands: Vec<String> = (0..8).map(|i| format!("G1 X{i}.000 F3000")).collect();
    let mut tasks = Vec::new();
    for cmd in commands.clone() {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            controller.send(&cmd).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Reassembled stream must split cleanly into the exact commands; a
    // single interleaved fragment would corrupt at least one line.
    let mut lines = wire.written_lines();
    lines.sort();
    let mut expected = commands;
    expected.sort();
    assert_eq!(lines, expected);

    controller.disconnect().await;
}

#[tokio::test]
async fn reader_publishes_lines_and_suppresses_blanks() {
    let wire = FakeWire::default();
    let controller = attached_controller(&wire);
    let (listener, received, faults) = CaptureListener::new();
    let _handle = controller.register_listener(listener);

    wire.feed(b"\r\n   \r\nok\r\necho:ready\n");

    let first = controller.wait_for_line(Duration::from_millis(500)).await;
    let second = controller.wait_for_line(Duration::from_millis(500)).await;
    assert_eq!(first.as_deref(), Some("ok"));
    assert_eq!(second.as_deref(), Some("echo:ready"));

    // Let the detached notifications land. They are fire-and-forget, so
    // assert membership rather than order.
    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert!(received.contains(&"ok".to_string()));
        assert!(received.contains(&"echo:ready".to_string()));
    }
    assert!(faults.lock().unwrap().is_empty());

    controller.disconnect().await;
}

#[tokio::test]
async fn wait_for_line_times_out_when_silent() {
    let wire = FakeWire::default();
    let controller = attached_controller(&wire);

    let line = controller.wait_for_line(Duration::from_millis(150)).await;
    assert_eq!(line, None);

    controller.disconnect().await;
}

#[tokio::test]
async fn late_line_reaches_exactly_one_waiter() {
    let wire = FakeWire::default();
    let controller = Arc::new(attached_controller(&wire));

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_for_line(Duration::from_millis(600)).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    wire.feed(b"ok\n");

    let mut results = Vec::new();
    for w in waiters {
        results.push(w.await.unwrap());
    }
    let winners = results.iter().filter(|r| r.is_some()).count();
    assert_eq!(winners, 1, "one line, one winner");

    controller.disconnect().await;
}

#[tokio::test]
async fn send_and_await_returns_next_line_or_times_out() {
    let wire = FakeWire::default();
    let controller = attached_controller(&wire);

    // Nothing talks back: the deadline surfaces as a timeout error.
    let err = controller
        .send_and_await("M115", Duration::from_millis(120))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // With a reply on the wire the very next line comes back.
    wire.feed(b"FIRMWARE_NAME:TestBoard\n");
    let reply = controller
        .send_and_await("M115", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(reply, "FIRMWARE_NAME:TestBoard");

    controller.disconnect().await;
}

#[tokio::test]
async fn send_is_silent_noop_when_disconnected() {
    let controller = DeviceController::default();
    controller.send("M114").await.unwrap();
}

fn quick_pacer_config() -> PacerConfig {
    PacerConfig {
        distance_mm: 0.1,
        initial_feed: 6000.0,
        feed_min: 10.0,
        feed_max: 6000.0,
        feed_step: 100.0,
    }
}

#[tokio::test]
async fn pacer_runs_setup_oscillates_and_restores() {
    let wire = FakeWire::default();
    let controller = DeviceController::new(quick_pacer_config());
    controller
        .attach(SerialLink::from_port(wire.port(), LinkParams::new("fake")))
        .unwrap();

    controller.start_pacer().await.unwrap();
    assert!(controller.is_pacing());
    tokio::time::sleep(Duration::from_millis(600)).await;
    controller.stop_pacer().await;
    assert!(!controller.is_pacing());

    let lines = wire.written_lines();
    let setup: Vec<&str> = lines.iter().take(3).map(String::as_str).collect();
    assert_eq!(setup, ["M17", "M211 S0", "G91"]);
    assert!(lines.iter().any(|l| l == "G1 X0.100 F6000"));
    assert!(lines.iter().any(|l| l == "G1 X-0.100 F6000"));
    // 0.1 mm at 6000 mm/min: 1 ms travel + 50 ms buffer.
    assert!(lines.iter().any(|l| l == "G4 P51"));
    assert_eq!(lines.last().map(String::as_str), Some("G90"));

    controller.disconnect().await;
}

#[tokio::test]
async fn pacer_rejects_double_start_and_ignores_double_stop() {
    let wire = FakeWire::default();
    let controller = DeviceController::new(quick_pacer_config());
    controller
        .attach(SerialLink::from_port(wire.port(), LinkParams::new("fake")))
        .unwrap();

    controller.start_pacer().await.unwrap();
    assert!(controller.start_pacer().await.is_err());

    controller.stop_pacer().await;
    // Second stop is a no-op, not an error.
    controller.stop_pacer().await;

    controller.disconnect().await;
}

#[tokio::test]
async fn pacer_requires_connection() {
    let controller = DeviceController::new(quick_pacer_config());
    assert!(controller.start_pacer().await.is_err());
}

#[tokio::test]
async fn disconnect_joins_pacer_before_closing() {
    let wire = FakeWire::default();
    let controller = DeviceController::new(quick_pacer_config());
    controller
        .attach(SerialLink::from_port(wire.port(), LinkParams::new("fake")))
        .unwrap();

    controller.start_pacer().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    controller.disconnect().await;

    assert!(!controller.is_pacing());
    assert!(!controller.is_connected());

    // The restore command made it onto the wire, which means the pacer was
    // joined and G90 written while the link was still open; a write after
    // close would have been dropped.
    let lines = wire.written_lines();
    assert_eq!(lines.last().map(String::as_str), Some("G90"));
}

#[tokio::test]
async fn feed_adjust_steps_and_clamps() {
    let controller = DeviceController::new(PacerConfig {
        distance_mm: 20.0,
        initial_feed: 3000.0,
        feed_min: 10.0,
        feed_max: 3200.0,
        feed_step: 100.0,
    });

    assert_eq!(controller.feed_rate(), 3000.0);
    assert_eq!(controller.adjust_feed(1), 3100.0);
    assert_eq!(controller.adjust_feed(5), 3200.0); // clamped at the ceiling
    assert_eq!(controller.adjust_feed(-2), 3000.0);
    assert_eq!(controller.adjust_feed(-40), 10.0); // clamped at the floor
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let wire = FakeWire::default();
    let controller = attached_controller(&wire);

    let second = SerialLink::from_port(wire.port(), LinkParams::new("fake"));
    assert!(controller.attach(second).is_err());

    controller.disconnect().await;
}
