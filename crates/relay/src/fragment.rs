//! Payload fragmentation for MTU-bounded mesh frames
//!
//! Splits an opaque transaction payload into ordered, individually checksummed
//! fragments sized to the transport's frame limit, and reverses the operation.
//! Each fragment carries a CRC32 of its own data so a single corrupted frame
//! can be identified without invalidating its siblings.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed per-frame header cost: transaction id (uuid string), index/total
/// counters, kind tag and checksum. The configured frame payload limit must
/// leave room for this on top of the data slice.
pub const FRAME_HEADER_OVERHEAD: usize = 56;

/// Position of a fragment within its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentKind {
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "MIDDLE")]
    Middle,
    #[serde(rename = "END")]
    End,
}

/// One MTU-sized slice of a transaction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub index: u32,
    pub total: u32,
    pub data: Vec<u8>,
    pub kind: FragmentKind,
    pub checksum: [u8; 4],
}

impl Fragment {
    /// Check the fragment's data against its recorded CRC32
    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data).to_be_bytes() == self.checksum
    }
}

/// Fragmentation cost report for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentationStats {
    pub original_size: usize,
    pub fragment_count: usize,
    pub max_fragment_size: usize,
    pub avg_fragment_size: f64,
    pub total_overhead: usize,
    pub efficiency: f64,
}

/// Split a payload into `ceil(len / max_frame_payload)` checksummed fragments.
///
/// A transaction always produces at least one fragment; an empty payload
/// yields a single empty fragment so the receiver still observes the
/// transaction. The first fragment is `START`, the last `END`, everything in
/// between `MIDDLE`; a single-fragment transaction collapses both markers
/// into one `START` fragment.
pub fn fragment(tx_id: &str, payload: &[u8], max_frame_payload: usize) -> RelayResult<Vec<Fragment>> {
    if tx_id.is_empty() {
        return Err(RelayError::InvalidArgument(
            "transaction id must not be empty".to_string(),
        ));
    }
    if max_frame_payload <= FRAME_HEADER_OVERHEAD {
        return Err(RelayError::InvalidConfiguration(format!(
            "max frame payload {} must exceed the {}-byte frame header",
            max_frame_payload, FRAME_HEADER_OVERHEAD
        )));
    }

    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(max_frame_payload).collect()
    };

    let total = chunks.len() as u32;
    let mut fragments = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.into_iter().enumerate() {
        let index = i as u32;
        fragments.push(Fragment {
            id: tx_id.to_string(),
            index,
            total,
            data: chunk.to_vec(),
            kind: kind_for(index, total),
            checksum: crc32fast::hash(chunk).to_be_bytes(),
        });
    }

    debug!(
        "fragmented transaction {} ({} bytes) into {} fragments",
        tx_id,
        payload.len(),
        total
    );

    Ok(fragments)
}

/// Reconstruct the original payload from a full fragment set.
///
/// Order-independent: fragments may arrive in any permutation. Fails unless
/// the set covers `[0, total)` exactly once with a consistent id and total,
/// and every fragment's checksum matches its data.
pub fn reconstruct(fragments: &[Fragment]) -> RelayResult<Vec<u8>> {
    let first = fragments
        .first()
        .ok_or_else(|| RelayError::Reassembly("no fragments to reconstruct".to_string()))?;

    let id = &first.id;
    let total = first.total;

    if total == 0 {
        return Err(RelayError::Reassembly(
            "fragment set declares a total of zero".to_string(),
        ));
    }
    if fragments.len() != total as usize {
        return Err(RelayError::Reassembly(format!(
            "expected {} fragments, got {}",
            total,
            fragments.len()
        )));
    }

    let mut slots: Vec<Option<&Fragment>> = vec![None; total as usize];
    let mut payload_len = 0usize;

    for frag in fragments {
        if frag.id != *id {
            return Err(RelayError::Reassembly(format!(
                "fragment id {} does not match transaction {}",
                frag.id, id
            )));
        }
        if frag.total != total {
            return Err(RelayError::Reassembly(format!(
                "inconsistent fragment total {} (expected {})",
                frag.total, total
            )));
        }
        if frag.index >= total {
            return Err(RelayError::Reassembly(format!(
                "fragment index {} out of range for total {}",
                frag.index, total
            )));
        }
        if !frag.verify_checksum() {
            return Err(RelayError::Reassembly(format!(
                "checksum mismatch on fragment {}",
                frag.index
            )));
        }
        let slot = &mut slots[frag.index as usize];
        if slot.is_some() {
            return Err(RelayError::Reassembly(format!(
                "duplicate fragment index {}",
                frag.index
            )));
        }
        payload_len += frag.data.len();
        *slot = Some(frag);
    }

    let mut payload = Vec::with_capacity(payload_len);
    for frag in slots.into_iter().flatten() {
        payload.extend_from_slice(&frag.data);
    }

    Ok(payload)
}

/// Report the fragmentation cost of a payload at a given frame limit without
/// producing the fragments. Used for diagnostics, not correctness.
pub fn fragmentation_stats(
    payload: &[u8],
    max_frame_payload: usize,
) -> RelayResult<FragmentationStats> {
    if max_frame_payload <= FRAME_HEADER_OVERHEAD {
        return Err(RelayError::InvalidConfiguration(format!(
            "max frame payload {} must exceed the {}-byte frame header",
            max_frame_payload, FRAME_HEADER_OVERHEAD
        )));
    }

    let original_size = payload.len();
    let fragment_count = fragment_count_for(original_size, max_frame_payload) as usize;
    let max_fragment_size = original_size.min(max_frame_payload);
    let total_overhead = fragment_count * FRAME_HEADER_OVERHEAD;
    let efficiency = if original_size == 0 {
        0.0
    } else {
        original_size as f64 / (original_size + total_overhead) as f64
    };

    Ok(FragmentationStats {
        original_size,
        fragment_count,
        max_fragment_size,
        avg_fragment_size: original_size as f64 / fragment_count as f64,
        total_overhead,
        efficiency,
    })
}

/// Number of fragments a payload of `len` bytes needs at the given frame limit
pub(crate) fn fragment_count_for(len: usize, max_frame_payload: usize) -> u32 {
    if len == 0 || max_frame_payload == 0 {
        1
    } else {
        ((len + max_frame_payload - 1) / max_frame_payload) as u32
    }
}

fn kind_for(index: u32, total: u32) -> FragmentKind {
    if index == 0 {
        FragmentKind::Start
    } else if index == total - 1 {
        FragmentKind::End
    } else {
        FragmentKind::Middle
    }
}
