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

use async_trait::async_trait;
use nusb::transfer::RequestBuffer;
use nusb::Interface;

use crate::usb::errors::TransferFailure;
use crate::usb::transport::BulkLink;
use crate::usb::{BULK_IN_ENDPOINT, BULK_OUT_ENDPOINT};

/// Claimed basestation interface. The claim is released when the last clone is dropped.
pub struct BasestationInterface {
    interface: Interface,
}

impl BasestationInterface {
    pub fn new(interface: Interface) -> Self {
        Self { interface }
    }
}

// Dropping a pending nusb transfer future cancels the transfer, so the timeouts
// applied by the transport also abort the request on the device.
#[async_trait]
impl BulkLink for BasestationInterface {
    async fn bulk_write(&self, payload: &[u8]) -> Result<usize, TransferFailure> {
        let response = self
            .interface
            .bulk_out(BULK_OUT_ENDPOINT, payload.to_vec())
            .await
            .into_result()?;
        Ok(response.actual_length())
    }

    async fn bulk_read(&self, capacity: usize) -> Result<Vec<u8>, TransferFailure> {
        let data = self
            .interface
            .bulk_in(BULK_IN_ENDPOINT, RequestBuffer::new(capacity))
            .await
            .into_result()?;
        Ok(data)
    }
}
