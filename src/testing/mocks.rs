//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for a broker connection: it records every frame
//! sent, plays back scripted handshake outcomes and lets a test inject inbound
//! frames or an abrupt connection drop.

use crate::error::ConnectionError;
use crate::protocol::frames::{Frame, FrameType, RawFrame};
use crate::transport::{ConnectionState, Credentials, EventSender, Transport, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct MockState {
    state: ConnectionState,
    sent: Vec<Frame>,
    connect_results: VecDeque<Result<(), ConnectionError>>,
    connect_calls: u32,
    connect_delay: Option<Duration>,
    send_budget: Option<usize>,
    events: Option<EventSender>,
    last_credentials: Option<Credentials>,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Mutex<MockState>,
    changed: Notify,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose handshakes fail with `error` `times` times, then succeed
    pub fn failing(times: usize, error: ConnectionError) -> Self {
        let mock = Self::new();
        for _ in 0..times {
            mock.push_connect_result(Err(error.clone()));
        }
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue the outcome of a future `connect` call; unscripted calls succeed
    pub fn push_connect_result(&self, result: Result<(), ConnectionError>) {
        self.lock().connect_results.push_back(result);
    }

    /// Make every `connect` call wait before completing
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Force the reported state without a handshake
    pub fn set_connected(&self, connected: bool) {
        self.lock().state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
    }

    /// Accept `count` more frames, then refuse every send
    pub fn fail_sends_after(&self, count: usize) {
        self.lock().send_budget = Some(count);
    }

    pub fn allow_sends(&self) {
        self.lock().send_budget = None;
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        self.lock().last_credentials.clone()
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    pub fn frames_of(&self, frame_type: FrameType) -> Vec<Frame> {
        self.lock()
            .sent
            .iter()
            .filter(|f| f.frame_type == frame_type)
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Deliver an inbound frame as if the broker had sent it
    pub fn inject_frame(&self, topic: &str, payload: &str) -> bool {
        self.emit(TransportEvent::Frame(RawFrame::new(topic, payload)))
    }

    /// Simulate an abrupt connection loss
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.lock().state = ConnectionState::Disconnected;
        self.emit(TransportEvent::Closed {
            abnormal: true,
            reason: reason.to_string(),
        })
    }

    /// Wait until `condition` holds or `timeout` passes
    ///
    /// Re-checked after every send and connect call.
    pub async fn wait_until<F>(&self, condition: F, timeout: Duration) -> bool
    where
        F: Fn(&MockTransport) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            if condition(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return condition(self);
            }
        }
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let sender = self.lock().events.clone();
        sender.is_some_and(|s| s.send(event).is_ok())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<(), ConnectionError> {
        let delay = {
            let mut state = self.lock();
            state.connect_calls += 1;
            state.state = ConnectionState::Connecting;
            state.last_credentials = Some(credentials.clone());
            state.connect_delay
        };
        self.changed.notify_waiters();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.lock();
            let result = state.connect_results.pop_front().unwrap_or(Ok(()));
            state.state = if result.is_ok() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            result
        };
        self.changed.notify_waiters();
        result
    }

    fn send(&self, frame: &Frame) -> bool {
        {
            let mut state = self.lock();
            if !state.state.is_connected() {
                return false;
            }
            match state.send_budget {
                Some(0) => return false,
                Some(ref mut remaining) => *remaining -= 1,
                None => {}
            }
            state.sent.push(frame.clone());
        }
        self.changed.notify_waiters();
        true
    }

    async fn close(&self) {
        self.lock().state = ConnectionState::Disconnected;
        self.emit(TransportEvent::Closed {
            abnormal: false,
            reason: "closed by client".to_string(),
        });
        self.changed.notify_waiters();
    }

    fn state(&self) -> ConnectionState {
        self.lock().state
    }

    fn set_event_sender(&self, sender: EventSender) {
        self.lock().events = Some(sender);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_scripted_connect_results() {
        let mock = MockTransport::failing(1, ConnectionError::network("refused"));
        assert!(mock.connect(&Credentials::anonymous()).await.is_err());
        assert_eq!(mock.state(), ConnectionState::Disconnected);
        assert!(mock.connect(&Credentials::new("u", "p")).await.is_ok());
        assert!(mock.is_connected());
        assert_eq!(mock.connect_calls(), 2);
        assert_eq!(
            mock.last_credentials().and_then(|c| c.username),
            Some("u".to_string())
        );
    }

    #[test]
    fn test_send_records_only_when_connected() {
        let mock = MockTransport::new();
        assert!(!mock.send(&Frame::subscribe("a/b/stream/c")));
        mock.set_connected(true);
        assert!(mock.send(&Frame::subscribe("a/b/stream/c")));
        assert_eq!(mock.frames_of(FrameType::Subscribe).len(), 1);
        assert!(mock.frames_of(FrameType::Publish).is_empty());
    }

    #[test]
    fn test_send_budget() {
        let mock = MockTransport::new();
        mock.set_connected(true);
        mock.fail_sends_after(1);
        assert!(mock.send(&Frame::subscribe("t1")));
        assert!(!mock.send(&Frame::subscribe("t2")));
        mock.allow_sends();
        assert!(mock.send(&Frame::subscribe("t3")));
        assert_eq!(mock.sent_frames().len(), 2);
    }

    #[tokio::test]
    async fn test_inject_and_drop() {
        let mock = MockTransport::new();
        assert!(!mock.inject_frame("t", "1"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        mock.set_event_sender(tx);
        mock.set_connected(true);

        assert!(mock.inject_frame("ns/d/stream/temp", "21"));
        assert!(mock.drop_connection("reset by peer"));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Frame(RawFrame::new("ns/d/stream/temp", "21")))
        );
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Closed { abnormal: true, .. })
        ));
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let mock = MockTransport::new();
        assert!(
            !mock
                .wait_until(|m| m.connect_calls() > 0, Duration::from_millis(20))
                .await
        );
    }
}
