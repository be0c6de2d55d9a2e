//! Built-in probes.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use reqmeter_core::Health;

use crate::watch::{Probe, ProbeError};

/// Up when a TCP connection to `addr` can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
}

impl TcpProbe {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> Result<Health, ProbeError> {
        let stream = TcpStream::connect(self.addr).await?;
        drop(stream);
        Ok(Health::Up)
    }
}
