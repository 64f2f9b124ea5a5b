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

//! Typed message channels: one JSON document per UDP datagram.

use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::service::{spawn_service, ServiceHandle};

const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Could not bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Could not resolve {0}")]
    Resolve(String),

    #[error("Could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Could not send to {address}: {source}")]
    Send {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    pub fn is_address_in_use(&self) -> bool {
        matches!(self, ChannelError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

/// Sends messages of one type to whoever listens on the other end.
pub trait Publisher<T>: Send + Sync {
    fn publish(&self, message: &T) -> Result<(), ChannelError>;
}

pub struct UdpPublisher<T> {
    socket: UdpSocket,
    target: SocketAddr,
    _message: PhantomData<fn(&T)>,
}

impl<T> UdpPublisher<T> {
    pub async fn connect(target: &str) -> Result<Self, ChannelError> {
        let target = tokio::net::lookup_host(target)
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ChannelError::Resolve(target.to_string()))?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| ChannelError::Bind { address: local.to_string(), source })?;
        Ok(Self { socket, target, _message: PhantomData })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl<T: Serialize> Publisher<T> for UdpPublisher<T> {
    fn publish(&self, message: &T) -> Result<(), ChannelError> {
        let datagram = serde_json::to_vec(message)?;
        self.socket
            .try_send_to(&datagram, self.target)
            .map_err(|source| ChannelError::Send { address: self.target, source })?;
        Ok(())
    }
}

/// Receiving end of a typed channel.
pub struct TypedSubscriber<T> {
    socket: UdpSocket,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSubscriber<T> {
    pub async fn bind(address: &str) -> Result<Self, ChannelError> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| ChannelError::Bind { address: address.to_string(), source })?;
        Ok(Self { socket, _message: PhantomData })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for the next datagram that decodes as `T`. Undecodable datagrams are skipped.
    pub async fn recv(&self, buffer: &mut [u8]) -> io::Result<T> {
        loop {
            let (len, peer) = self.socket.recv_from(buffer).await?;
            match serde_json::from_slice(&buffer[..len]) {
                Ok(message) => return Ok(message),
                Err(e) => warn!("Discarding undecodable message from {}: {}", peer, e),
            }
        }
    }
}

/// Feeds every message received on `subscriber` to `handler`, one at a time.
pub fn spawn_subscriber<T, F, Fut>(subscriber: TypedSubscriber<T>, handler: F) -> ServiceHandle
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    spawn_service(move |mut stop| async move {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = stop.signaled() => break,
                received = subscriber.recv(&mut buffer) => match received {
                    Ok(message) => handler(message).await,
                    Err(e) => debug!("Receive error on channel: {}", e),
                },
            }
        }
    })
}
