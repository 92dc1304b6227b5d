//! Per-slot connection info exchanged during rendezvous.

use crate::error::{RdmaError, Result};

/// Everything a peer needs to drive one queue pair at us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdmaEndpoint {
    pub qp_num: u32,
    /// Starting packet sequence number.
    pub psn: u32,
    pub lid: u16,
    pub gid: [u8; 16],
    /// Base address of the registered reduction region.
    pub addr: u64,
    pub rkey: u32,
}

pub const ENDPOINT_SIZE: usize = 38;

impl RdmaEndpoint {
    pub fn to_bytes(&self) -> [u8; ENDPOINT_SIZE] {
        let mut buf = [0u8; ENDPOINT_SIZE];
        buf[0..4].copy_from_slice(&self.qp_num.to_le_bytes());
        buf[4..8].copy_from_slice(&self.psn.to_le_bytes());
        buf[8..10].copy_from_slice(&self.lid.to_le_bytes());
        buf[10..26].copy_from_slice(&self.gid);
        buf[26..34].copy_from_slice(&self.addr.to_le_bytes());
        buf[34..38].copy_from_slice(&self.rkey.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let buf: &[u8; ENDPOINT_SIZE] = buf.try_into().map_err(|_| RdmaError::Endpoint {
            reason: format!("expected {ENDPOINT_SIZE} bytes, got {}", buf.len()),
        })?;
        let mut gid = [0u8; 16];
        gid.copy_from_slice(&buf[10..26]);
        let mut addr = [0u8; 8];
        addr.copy_from_slice(&buf[26..34]);
        Ok(Self {
            qp_num: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            psn: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            lid: u16::from_le_bytes([buf[8], buf[9]]),
            gid,
            addr: u64::from_le_bytes(addr),
            rkey: u32::from_le_bytes([buf[34], buf[35], buf[36], buf[37]]),
        })
    }

    /// Serialise a whole group's endpoints back to back.
    pub fn encode_all(endpoints: &[RdmaEndpoint]) -> Vec<u8> {
        endpoints.iter().flat_map(|e| e.to_bytes()).collect()
    }

    pub fn decode_all(buf: &[u8]) -> Result<Vec<RdmaEndpoint>> {
        if buf.len() % ENDPOINT_SIZE != 0 {
            return Err(RdmaError::Endpoint {
                reason: format!("{} bytes is not a whole number of endpoints", buf.len()),
            });
        }
        buf.chunks_exact(ENDPOINT_SIZE).map(Self::from_bytes).collect()
    }
}
