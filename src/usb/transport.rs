// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::time::timeout;

use crate::definitions::Team;
use crate::protocol::BasestationFrame;
use crate::usb::errors::{DeviceOpenError, TransferFailure};

/// Bulk endpoints of an opened basestation.
#[async_trait]
pub trait BulkLink: Send + Sync + 'static {
    async fn bulk_write(&self, payload: &[u8]) -> Result<usize, TransferFailure>;

    /// Reads one transfer of at most `capacity` bytes.
    async fn bulk_read(&self, capacity: usize) -> Result<Vec<u8>, TransferFailure>;
}

/// Knows how to find and claim the basestation bound to one team.
#[async_trait]
pub trait LinkOpener: Send + Sync + 'static {
    type Link: BulkLink;

    async fn open(&self) -> Result<Self::Link, DeviceOpenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    NotConnected,
    Opening,
    Active,
    /// Too many transfers failed; the device is closed and reopened on the next attempt.
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub read_buffer_size: usize,
    /// Consecutive failed transfers after which the device is reconnected.
    pub failure_threshold: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(100),
            read_buffer_size: 4096,
            failure_threshold: 10,
        }
    }
}

struct TransportInner<L> {
    state: TransportState,
    link: Option<Arc<L>>,
    consecutive_failures: u32,
}

/// Lifecycle and bulk I/O of the basestation bound to one team.
pub struct BasestationTransport<O: LinkOpener> {
    team: Team,
    opener: O,
    config: TransportConfig,
    inner: Mutex<TransportInner<O::Link>>,
}

impl<O: LinkOpener> BasestationTransport<O> {
    pub fn new(team: Team, opener: O, config: TransportConfig) -> Self {
        Self {
            team,
            opener,
            config,
            inner: Mutex::new(TransportInner {
                state: TransportState::NotConnected,
                link: None,
                consecutive_failures: 0,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, TransportInner<O::Link>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn team(&self) -> Team {
        self.team
    }

    #[cfg(test)]
    pub(crate) fn opener(&self) -> &O {
        &self.opener
    }

    pub fn state(&self) -> TransportState {
        self.inner().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransportState::Active
    }

    /// Opens and claims the device. On failure the transport stays `NotConnected`.
    pub async fn open(&self) -> Result<(), DeviceOpenError> {
        self.inner().state = TransportState::Opening;
        let result = self.opener.open().await;
        let mut inner = self.inner();
        match result {
            Ok(link) => {
                inner.link = Some(Arc::new(link));
                inner.state = TransportState::Active;
                inner.consecutive_failures = 0;
                info!("Basestation for team {} opened", self.team);
                Ok(())
            }
            Err(e) => {
                inner.link = None;
                inner.state = TransportState::NotConnected;
                Err(e)
            }
        }
    }

    /// Releases the device. A read in flight keeps its handle until it times out.
    pub fn close(&self) {
        let link = {
            let mut inner = self.inner();
            inner.state = TransportState::NotConnected;
            inner.consecutive_failures = 0;
            inner.link.take()
        };
        if link.is_some() {
            debug!("Basestation for team {} closed", self.team);
        }
    }

    pub async fn reconnect(&self) -> Result<(), DeviceOpenError> {
        self.close();
        self.open().await
    }

    fn active_link(&self) -> Option<Arc<O::Link>> {
        let inner = self.inner();
        if inner.state == TransportState::Active {
            inner.link.clone()
        } else {
            None
        }
    }

    fn record_success(&self) {
        self.inner().consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.inner();
        inner.consecutive_failures += 1;
        if inner.state == TransportState::Active && inner.consecutive_failures >= self.config.failure_threshold {
            warn!(
                "{} consecutive transfer failures on basestation for team {}, scheduling reconnect",
                inner.consecutive_failures, self.team
            );
            inner.state = TransportState::Reconnecting;
        }
    }

    /// Sends one payload. Returns the number of bytes written, 0 when the packet was dropped.
    pub async fn write(&self, payload: &[u8]) -> usize {
        let Some(link) = self.active_link() else {
            debug!("Basestation for team {} not connected, dropping packet", self.team);
            return 0;
        };
        match timeout(self.config.write_timeout, link.bulk_write(payload)).await {
            Ok(Ok(written)) => {
                self.record_success();
                written
            }
            Ok(Err(e)) => {
                warn!("Failed to send message to basestation for team {}: {}", self.team, e);
                self.record_failure();
                0
            }
            Err(_) => {
                warn!("Sending message to basestation for team {} timed out", self.team);
                self.record_failure();
                0
            }
        }
    }

    /// Waits up to the read timeout for one incoming frame.
    ///
    /// Timeouts are the normal idle case and yield `None`. Other errors are logged,
    /// counted towards the reconnect threshold and also yield `None`.
    pub async fn poll_read(&self) -> Option<BasestationFrame> {
        let link = self.active_link()?;
        match timeout(self.config.read_timeout, link.bulk_read(self.config.read_buffer_size)).await {
            Err(_) | Ok(Err(TransferFailure::Timeout)) => None,
            Ok(Err(e)) => {
                error!("Error while reading from basestation for team {}: {}", self.team, e);
                self.record_failure();
                None
            }
            Ok(Ok(data)) if data.is_empty() => None,
            Ok(Ok(data)) => {
                self.record_success();
                Some(BasestationFrame::new(self.team, data))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone)]
    pub enum ScriptedRead {
        Data(Vec<u8>),
        Fail(TransferFailure),
        /// Never completes within any reasonable read timeout.
        Hang,
    }

    #[derive(Default)]
    pub struct LinkScript {
        pub reads: Mutex<VecDeque<ScriptedRead>>,
        pub write_results: Mutex<VecDeque<Result<usize, TransferFailure>>>,
        pub written: Mutex<Vec<Vec<u8>>>,
        /// Returned by every transfer once the scripted ones ran out.
        pub persistent_failure: Option<TransferFailure>,
    }

    impl LinkScript {
        pub fn failing(failure: TransferFailure) -> Self {
            Self { persistent_failure: Some(failure), ..Default::default() }
        }

        pub fn push_read(&self, read: ScriptedRead) {
            self.reads.lock().unwrap().push_back(read);
        }

        pub fn push_write_result(&self, result: Result<usize, TransferFailure>) {
            self.write_results.lock().unwrap().push_back(result);
        }

        pub fn written(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }
    }

    pub struct MockLink {
        script: Arc<LinkScript>,
    }

    #[async_trait]
    impl BulkLink for MockLink {
        async fn bulk_write(&self, payload: &[u8]) -> Result<usize, TransferFailure> {
            let result = self.script.write_results.lock().unwrap().pop_front();
            let result = result.unwrap_or_else(|| match &self.script.persistent_failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(payload.len()),
            });
            if result.is_ok() {
                self.script.written.lock().unwrap().push(payload.to_vec());
            }
            result
        }

        async fn bulk_read(&self, _capacity: usize) -> Result<Vec<u8>, TransferFailure> {
            let next = self.script.reads.lock().unwrap().pop_front();
            let next = next.or_else(|| self.script.persistent_failure.clone().map(ScriptedRead::Fail));
            match next {
                Some(ScriptedRead::Data(data)) => Ok(data),
                Some(ScriptedRead::Fail(failure)) => Err(failure),
                Some(ScriptedRead::Hang) | None => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(TransferFailure::Timeout)
                }
            }
        }
    }

    pub struct MockOpener {
        pub script: Arc<LinkScript>,
        pub failing_opens: AtomicU32,
        pub opens: AtomicU32,
    }

    impl MockOpener {
        pub fn new(script: Arc<LinkScript>) -> Self {
            Self { script, failing_opens: AtomicU32::new(0), opens: AtomicU32::new(0) }
        }

        pub fn failing(script: Arc<LinkScript>, failing_opens: u32) -> Self {
            Self { script, failing_opens: AtomicU32::new(failing_opens), opens: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl LinkOpener for MockOpener {
        type Link = MockLink;

        async fn open(&self) -> Result<MockLink, DeviceOpenError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_opens.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_opens.store(remaining - 1, Ordering::SeqCst);
                return Err(DeviceOpenError::NotFound("mock basestation".to_string()));
            }
            Ok(MockLink { script: self.script.clone() })
        }
    }

    pub fn fast_config() -> TransportConfig {
        TransportConfig {
            write_timeout: Duration::from_millis(50),
            read_timeout: Duration::from_millis(20),
            read_buffer_size: 64,
            failure_threshold: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn transport(script: &Arc<LinkScript>) -> BasestationTransport<MockOpener> {
        BasestationTransport::new(Team::Blue, MockOpener::new(script.clone()), fast_config())
    }

    #[tokio::test]
    async fn open_failure_leaves_transport_not_connected() {
        let script = Arc::new(LinkScript::default());
        let transport = BasestationTransport::new(Team::Yellow, MockOpener::failing(script, 1), fast_config());
        assert!(matches!(transport.open().await, Err(DeviceOpenError::NotFound(_))));
        assert_eq!(transport.state(), TransportState::NotConnected);
        assert_eq!(transport.write(&[1, 2, 3]).await, 0);

        transport.open().await.unwrap();
        assert_eq!(transport.state(), TransportState::Active);
    }

    #[tokio::test]
    async fn write_returns_bytes_or_zero_on_failure() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();

        assert_eq!(transport.write(&[0x10; 28]).await, 28);
        script.push_write_result(Err(TransferFailure::Failed("stall".to_string())));
        assert_eq!(transport.write(&[0x10; 28]).await, 0);
        assert_eq!(script.written().len(), 1);
        assert_eq!(transport.state(), TransportState::Active);
    }

    #[tokio::test]
    async fn poll_read_yields_nothing_on_timeout_and_keeps_polling_after_errors() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();

        script.push_read(ScriptedRead::Hang);
        script.push_read(ScriptedRead::Fail(TransferFailure::Timeout));
        script.push_read(ScriptedRead::Fail(TransferFailure::Failed("crc".to_string())));
        script.push_read(ScriptedRead::Data(vec![0x20, 1, 2]));

        assert_eq!(transport.poll_read().await, None);
        assert_eq!(transport.poll_read().await, None);
        assert_eq!(transport.poll_read().await, None);
        let frame = transport.poll_read().await.unwrap();
        assert_eq!(frame.team, Team::Blue);
        assert_eq!(frame.payload, vec![0x20, 1, 2]);
        assert_eq!(transport.state(), TransportState::Active);
    }

    #[tokio::test]
    async fn repeated_failures_trigger_reconnect() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();

        for _ in 0..fast_config().failure_threshold {
            script.push_write_result(Err(TransferFailure::Disconnected));
            assert_eq!(transport.write(&[1]).await, 0);
        }
        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert_eq!(transport.write(&[1]).await, 0);
        assert_eq!(transport.poll_read().await, None);

        transport.reconnect().await.unwrap();
        assert_eq!(transport.state(), TransportState::Active);
        assert_eq!(transport.opener.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reads_alone_trigger_reconnect() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();

        for _ in 0..fast_config().failure_threshold - 1 {
            script.push_read(ScriptedRead::Fail(TransferFailure::Failed("babble".to_string())));
            assert_eq!(transport.poll_read().await, None);
        }
        assert_eq!(transport.state(), TransportState::Active);
        script.push_read(ScriptedRead::Fail(TransferFailure::Disconnected));
        assert_eq!(transport.poll_read().await, None);
        assert_eq!(transport.state(), TransportState::Reconnecting);
        assert!(script.written().is_empty());
    }

    #[tokio::test]
    async fn read_timeouts_do_not_count_as_failures() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();
        for _ in 0..5 {
            script.push_read(ScriptedRead::Fail(TransferFailure::Timeout));
            assert_eq!(transport.poll_read().await, None);
        }
        assert_eq!(transport.state(), TransportState::Active);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();
        for _ in 0..2 {
            script.push_write_result(Err(TransferFailure::Failed("x".to_string())));
            transport.write(&[1]).await;
        }
        assert_eq!(transport.write(&[1]).await, 1);
        for _ in 0..2 {
            script.push_write_result(Err(TransferFailure::Failed("x".to_string())));
            transport.write(&[1]).await;
        }
        assert_eq!(transport.state(), TransportState::Active);
    }

    #[tokio::test]
    async fn close_drops_link() {
        let script = Arc::new(LinkScript::default());
        let transport = transport(&script);
        transport.open().await.unwrap();
        transport.close();
        assert_eq!(transport.state(), TransportState::NotConnected);
        assert_eq!(transport.write(&[1]).await, 0);
        assert_eq!(Arc::strong_count(&script), 2);
    }
}
