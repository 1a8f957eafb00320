//! Socket-addressed block placement.
//!
//! MC_SOCKETS repositories spread each pod over a range of hosts. The
//! path format carries two fields that are only known per block, the
//! host octet and the block number, e.g.
//! `192.168.0.%%d:1200/zfs/repo/pod%d/block%%d/cap%d/scatter%d`.
//! Host octets advance sequentially across all hosts of all pods.

use tracing::warn;

use crate::ec::BlockPathRenderer;
use crate::error::{DalError, DalResult};
use crate::mc::placement::Geometry;
use crate::template::{format_template, FmtArg};

/// Host addressing parameters of a socket repository.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SocketsConfig {
    /// First host octet.
    pub host_offset: u32,
    /// Hosts across all pods.
    pub host_count: u32,
    /// Blocks served by one host.
    pub blocks_per_host: u32,
    /// Added to the block number in the path.
    pub block_offset: u32,
    /// Accepted for compatibility; block numbering is always per-pod.
    pub global_block_numbering: i64,
    /// Added to the pod index in the path.
    pub pod_offset: u32,
    /// User for socket authentication, recorded only.
    pub mc_user: Option<String>,
}

impl SocketsConfig {
    /// Checks the divisors used when rendering block paths, and that the
    /// highest pod, host and block numbers of `geometry` fit in 32 bits.
    pub fn validate(&self, geometry: &Geometry) -> DalResult<()> {
        let num_pods = geometry.num_pods;
        if self.blocks_per_host == 0 {
            return Err(DalError::InvalidOption {
                key: "blocks_per_host".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        let last_pod = num_pods.saturating_sub(1);
        let last_block = geometry.num_blocks().saturating_sub(1);
        if last_pod.checked_add(self.pod_offset).is_none() {
            return Err(overflow("pod_offset"));
        }
        let r = self.renderer(num_pods, last_pod);
        if r.host(last_block).is_none() {
            return Err(overflow("host_offset"));
        }
        if r.block_number(last_block).is_none() {
            return Err(overflow("block_offset"));
        }
        if num_pods > 0 && self.host_count % num_pods != 0 {
            warn!(
                "host_count {} is not a multiple of num_pods {}; hosts per pod rounds down to {}",
                self.host_count,
                num_pods,
                self.host_count / num_pods
            );
        }
        Ok(())
    }

    /// Renderer for the blocks of an object placed in `pod`.
    pub fn renderer(&self, num_pods: u32, pod: u32) -> SocketBlockRenderer {
        SocketBlockRenderer {
            hosts_per_pod: self.host_count / num_pods.max(1),
            host_offset: self.host_offset,
            blocks_per_host: self.blocks_per_host.max(1),
            block_offset: self.block_offset,
            pod,
        }
    }
}

/// Fills the host octet and block number of a socket path template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketBlockRenderer {
    hosts_per_pod: u32,
    host_offset: u32,
    blocks_per_host: u32,
    block_offset: u32,
    pod: u32,
}

impl SocketBlockRenderer {
    /// Host octet serving `block`, `None` on overflow.
    pub fn host(&self, block: u32) -> Option<u32> {
        self.pod
            .checked_mul(self.hosts_per_pod)?
            .checked_add(self.host_offset)?
            .checked_add(block / self.blocks_per_host)
    }

    /// Block number written into the path, `None` on overflow.
    pub fn block_number(&self, block: u32) -> Option<u32> {
        block.checked_add(self.block_offset)
    }
}

fn overflow(key: &str) -> DalError {
    DalError::InvalidOption {
        key: key.to_string(),
        reason: "socket address arithmetic overflows".to_string(),
    }
}

impl BlockPathRenderer for SocketBlockRenderer {
    fn render(&self, template: &str, block: u32) -> DalResult<String> {
        let host = self.host(block).ok_or_else(|| overflow("host_offset"))?;
        let number = self
            .block_number(block)
            .ok_or_else(|| overflow("block_offset"))?;
        format_template(
            template,
            &[FmtArg::Int(host as i64), FmtArg::Int(number as i64)],
        )
    }
}
