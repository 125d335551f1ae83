//! Ordered, non-blocking hand-off of status lines from the reader thread to a UI.
//!
//! [`Notifier`] is the producer half. It never waits: when the bounded queue is full the
//! oldest undelivered line is discarded. [`NotificationPump`] is the consumer half. It either
//! drains on the consumer's own schedule ([`NotificationPump::drain`]) or runs on a thread of
//! its own ([`NotificationPump::spawn`]) and hands each line to a [`UiSink`].
//!
//! Once the consumer is gone, sends are silently dropped.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::sync::{Parker, Unparker};

/// Receives notification lines on the consumer's context.
pub trait UiSink: Send {
    fn receive(&mut self, text: &str);
}

impl<F: FnMut(&str) + Send> UiSink for F {
    fn receive(&mut self, text: &str) {
        self(text)
    }
}

struct Channel {
    queue: ArrayQueue<String>,
    closed: AtomicCell<bool>,
    overwritten: AtomicCell<u64>,
    unparker: Unparker,
}

/// Creates a channel that holds at most `capacity` undelivered lines.
pub fn notification_channel(capacity: usize) -> (Notifier, NotificationPump) {
    let parker = Parker::new();
    let channel = Arc::new(Channel {
        queue: ArrayQueue::new(capacity.max(1)),
        closed: AtomicCell::new(false),
        overwritten: AtomicCell::new(0),
        unparker: parker.unparker().clone(),
    });
    (
        Notifier {
            channel: channel.clone(),
        },
        NotificationPump { channel, parker },
    )
}

/// Producer half. Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct Notifier {
    channel: Arc<Channel>,
}

impl Notifier {
    /// Queues `text` for the consumer. Returns `false` if the consumer has shut down.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if self.channel.closed.load() {
            return false;
        }
        if let Some(lost) = self.channel.queue.force_push(text.into()) {
            self.channel.overwritten.fetch_add(1);
            log::trace!("notification queue full, dropped: {lost}");
        }
        self.channel.unparker.unpark();
        true
    }

    /// Whether the consumer is still accepting lines.
    pub fn is_open(&self) -> bool {
        !self.channel.closed.load()
    }

    /// Lines discarded because the queue was full.
    pub fn overwritten(&self) -> u64 {
        self.channel.overwritten.load()
    }
}

/// Consumer half.
pub struct NotificationPump {
    channel: Arc<Channel>,
    parker: Parker,
}

impl NotificationPump {
    /// Delivers every queued line to `sink`, in order. Returns how many were delivered.
    pub fn drain(&mut self, sink: &mut dyn UiSink) -> usize {
        let mut delivered = 0;
        while let Some(line) = self.channel.queue.pop() {
            sink.receive(&line);
            delivered += 1;
        }
        delivered
    }

    /// Blocks until a line is sent or `timeout` passes.
    pub fn wait(&self, timeout: Duration) {
        if self.channel.queue.is_empty() {
            self.parker.park_timeout(timeout);
        }
    }

    /// Stops accepting lines and discards whatever is still queued.
    pub fn close(&self) {
        self.channel.closed.store(true);
        while self.channel.queue.pop().is_some() {}
    }

    /// Moves the consumer onto its own thread.
    pub fn spawn(self, sink: impl UiSink + 'static) -> std::io::Result<PumpThread> {
        let channel = self.channel.clone();
        let handle = thread::Builder::new()
            .name("notification-pump".into())
            .spawn(move || {
                let mut pump = self;
                let mut sink = sink;
                while !pump.channel.closed.load() {
                    pump.drain(&mut sink);
                    pump.wait(Duration::from_millis(100));
                }
            })?;
        Ok(PumpThread {
            channel,
            handle: Some(handle),
        })
    }
}

impl Drop for NotificationPump {
    fn drop(&mut self) {
        self.channel.closed.store(true);
    }
}

/// Handle to a consumer running on its own thread. Dropping it stops the thread.
pub struct PumpThread {
    channel: Arc<Channel>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PumpThread {
    /// Stops the consumer. Lines still queued are not delivered.
    pub fn stop(&mut self) {
        self.channel.closed.store(true);
        self.channel.unparker.unpark();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("notification sink panicked");
            }
        }
    }
}

impl Drop for PumpThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[test]
    fn delivers_in_order() {
        let (notifier, mut pump) = notification_channel(8);
        for i in 0..5 {
            assert!(notifier.send(format!("line {i}")));
        }
        let mut got = vec![];
        let mut sink = |text: &str| got.push(text.to_owned());
        assert_eq!(pump.drain(&mut sink), 5);
        assert_eq!(got, ["line 0", "line 1", "line 2", "line 3", "line 4"]);
    }

    #[test]
    fn full_queue_drops_oldest_without_blocking() {
        let (notifier, mut pump) = notification_channel(2);
        notifier.send("a");
        notifier.send("b");
        notifier.send("c");
        assert_eq!(notifier.overwritten(), 1);
        let mut got = vec![];
        pump.drain(&mut |text: &str| got.push(text.to_owned()));
        assert_eq!(got, ["b", "c"]);
    }

    #[test]
    fn sends_after_consumer_teardown_are_dropped() {
        let (notifier, pump) = notification_channel(4);
        drop(pump);
        assert!(!notifier.is_open());
        assert!(!notifier.send("late"));
    }

    #[test]
    fn spawned_pump_delivers_from_another_thread() {
        let (notifier, pump) = notification_channel(16);
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink_got = got.clone();
        let mut pump_thread = pump
            .spawn(move |text: &str| sink_got.lock().unwrap().push(text.to_owned()))
            .unwrap();

        let producer = thread::spawn(move || {
            for i in 0..10 {
                notifier.send(i.to_string());
            }
        });
        producer.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while got.lock().unwrap().len() < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pump_thread.stop();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(*got.lock().unwrap(), expected);
    }

    #[test]
    fn stopping_pump_thread_twice_is_harmless() {
        let (_notifier, pump) = notification_channel(1);
        let mut pump_thread = pump.spawn(|_: &str| {}).unwrap();
        pump_thread.stop();
        pump_thread.stop();
    }
}
