//! Chunked transfers — splitting on the way out, reassembly on the way in.
//!
//! One state machine serves two traffic classes: plaintext file transfers
//! (outer types 0x06/0x07) and oversized encrypted payloads (outer types
//! 0x09/0x07). A transfer opens with a metadata packet and completes when
//! every fragment index has arrived; order on the air is irrelevant.
//! Fragments for ids nobody announced are logged and dropped. There is no
//! retransmission; an incomplete assembly is evicted after a timeout so a
//! lost fragment cannot pin memory forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use weft_core::payload::{FileMetadata, Fragment, TxMetadata};
use weft_core::wire::PeerId;

/// Fragment payload size for file transfers.
pub const FILE_CHUNK_SIZE: usize = 180;

/// Fragment payload size for oversized encrypted payloads.
pub const TX_CHUNK_SIZE: usize = 400;

/// Ciphertext above this size is chunked instead of sent as one envelope.
pub const SINGLE_ENVELOPE_MAX: usize = 450;

/// Incomplete assemblies older than this are evicted.
pub const ASSEMBLY_TIMEOUT: Duration = Duration::from_secs(300);

// ── Splitting ─────────────────────────────────────────────────────────────────

/// Split file bytes into metadata plus fragments of [`FILE_CHUNK_SIZE`].
pub fn split_file(
    transfer_id: &str,
    file_name: &str,
    mime_type: &str,
    data: &[u8],
) -> (FileMetadata, Vec<Fragment>) {
    let fragments = split(transfer_id, data, FILE_CHUNK_SIZE);
    let metadata = FileMetadata {
        transfer_id: transfer_id.to_owned(),
        file_name: file_name.to_owned(),
        file_size: data.len() as u32,
        mime_type: mime_type.to_owned(),
        total_chunks: fragments.len() as u32,
    };
    (metadata, fragments)
}

/// Split an oversized ciphertext into metadata plus fragments of
/// [`TX_CHUNK_SIZE`].
pub fn split_ciphertext(tx_id: &str, ciphertext: &[u8]) -> (TxMetadata, Vec<Fragment>) {
    let fragments = split(tx_id, ciphertext, TX_CHUNK_SIZE);
    let metadata = TxMetadata {
        tx_id: tx_id.to_owned(),
        total_size: ciphertext.len() as u32,
        total_chunks: fragments.len() as u32,
    };
    (metadata, fragments)
}

fn split(id: &str, data: &[u8], chunk_size: usize) -> Vec<Fragment> {
    let total_chunks = data.len().div_ceil(chunk_size).max(1) as u32;
    data.chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| Fragment {
            id: id.to_owned(),
            chunk_index: index as u32,
            total_chunks,
            data: Bytes::copy_from_slice(chunk),
        })
        .collect()
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// A finished transfer handed back to the dispatcher.
#[derive(Debug)]
pub enum Completed {
    /// A file arrived in full.
    File {
        metadata: FileMetadata,
        sender: PeerId,
        data: Vec<u8>,
    },
    /// An oversized ciphertext arrived in full. The dispatcher decrypts it
    /// as if it were the payload of an envelope from `sender`.
    Transaction { sender: PeerId, ciphertext: Vec<u8> },
}

struct FileAssembly {
    metadata: FileMetadata,
    sender: PeerId,
    fragments: HashMap<u32, Bytes>,
    started_at: Instant,
}

struct TxAssembly {
    metadata: TxMetadata,
    sender: PeerId,
    fragments: HashMap<u32, Bytes>,
    started_at: Instant,
}

/// All in-flight reassemblies, keyed by transfer id.
/// Owned exclusively by the dispatcher task.
pub struct PendingTransfers {
    files: HashMap<String, FileAssembly>,
    transactions: HashMap<String, TxAssembly>,
    timeout: Duration,
}

impl Default for PendingTransfers {
    fn default() -> Self {
        Self::new(ASSEMBLY_TIMEOUT)
    }
}

impl PendingTransfers {
    pub fn new(timeout: Duration) -> Self {
        Self {
            files: HashMap::new(),
            transactions: HashMap::new(),
            timeout,
        }
    }

    /// Open a file transfer from its metadata packet.
    /// A duplicate id restarts the assembly.
    pub fn begin_file(&mut self, metadata: FileMetadata, sender: PeerId) {
        self.sweep();
        self.files.insert(
            metadata.transfer_id.clone(),
            FileAssembly {
                metadata,
                sender,
                fragments: HashMap::new(),
                started_at: Instant::now(),
            },
        );
    }

    /// Open an oversized-ciphertext transfer from its metadata packet.
    pub fn begin_transaction(&mut self, metadata: TxMetadata, sender: PeerId) {
        self.sweep();
        self.transactions.insert(
            metadata.tx_id.clone(),
            TxAssembly {
                metadata,
                sender,
                fragments: HashMap::new(),
                started_at: Instant::now(),
            },
        );
    }

    /// Store one fragment. Returns the completed transfer once the last
    /// missing index arrives; `None` while incomplete. Fragments for an
    /// unknown id are dropped.
    pub fn accept_fragment(&mut self, fragment: Fragment) -> Option<Completed> {
        if let Some(assembly) = self.files.get_mut(&fragment.id) {
            assembly.fragments.insert(fragment.chunk_index, fragment.data);
            if assembly.fragments.len() as u32 == assembly.metadata.total_chunks {
                let assembly = self.files.remove(&fragment.id).expect("present");
                return Some(Completed::File {
                    data: concat_in_order(&assembly.fragments, assembly.metadata.total_chunks),
                    metadata: assembly.metadata,
                    sender: assembly.sender,
                });
            }
            return None;
        }

        if let Some(assembly) = self.transactions.get_mut(&fragment.id) {
            assembly.fragments.insert(fragment.chunk_index, fragment.data);
            if assembly.fragments.len() as u32 == assembly.metadata.total_chunks {
                let assembly = self.transactions.remove(&fragment.id).expect("present");
                return Some(Completed::Transaction {
                    ciphertext: concat_in_order(
                        &assembly.fragments,
                        assembly.metadata.total_chunks,
                    ),
                    sender: assembly.sender,
                });
            }
            return None;
        }

        tracing::debug!(id = %fragment.id, index = fragment.chunk_index, "fragment for unknown transfer, dropping");
        None
    }

    /// Number of in-flight assemblies across both classes.
    pub fn in_flight(&self) -> usize {
        self.files.len() + self.transactions.len()
    }

    /// Drop everything. Used by stop().
    pub fn clear(&mut self) {
        self.files.clear();
        self.transactions.clear();
    }

    /// Evict assemblies that have been waiting longer than the timeout.
    fn sweep(&mut self) {
        let timeout = self.timeout;
        self.files.retain(|id, assembly| {
            let stale = assembly.started_at.elapsed() > timeout;
            if stale {
                tracing::warn!(id, "evicting stale file assembly");
            }
            !stale
        });
        self.transactions.retain(|id, assembly| {
            let stale = assembly.started_at.elapsed() > timeout;
            if stale {
                tracing::warn!(id, "evicting stale transaction assembly");
            }
            !stale
        });
    }
}

/// Concatenate fragments in ascending chunk-index order.
fn concat_in_order(fragments: &HashMap<u32, Bytes>, total_chunks: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for index in 0..total_chunks {
        if let Some(chunk) = fragments.get(&index) {
            out.extend_from_slice(chunk);
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
