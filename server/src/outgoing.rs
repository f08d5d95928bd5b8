//! Per-tick outgoing packet aggregation
//!
//! Packets produced during a tick are grouped by the exact set of peers that
//! should receive them. Large packets are compressed on the worker pool as
//! soon as they are enqueued; their slot in the queue is reserved up front so
//! compression never reorders anything. [`OutgoingQueue::flush`] is the tick
//! barrier: it waits for every compression started before it and hands the
//! packets to the network sender in enqueue order.

use indexmap::IndexMap;
use log::{error, trace};
use parking_lot::Mutex;
use protocol::{BatchEnvelope, ProtocolError, RawPacket};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

use crate::workers::WorkerPool;

/// Sorted, deduplicated list of recipients
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipientSet(Vec<SocketAddr>);

impl RecipientSet {
    pub fn single(addr: SocketAddr) -> Self {
        Self(vec![addr])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketAddr> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.0.binary_search(addr).is_ok()
    }
}

impl FromIterator<SocketAddr> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = SocketAddr>>(iter: I) -> Self {
        let mut addrs: Vec<SocketAddr> = iter.into_iter().collect();
        addrs.sort();
        addrs.dedup();
        Self(addrs)
    }
}

/// One packet bound for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub addr: SocketAddr,
    pub packet: RawPacket,
}

enum Slot {
    Ready(RawPacket),
    Compressing(JoinHandle<Result<RawPacket, ProtocolError>>),
}

pub struct OutgoingQueue {
    pending: Mutex<IndexMap<RecipientSet, Vec<Slot>>>,
    pool: WorkerPool,
}

impl OutgoingQueue {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pending: Mutex::new(IndexMap::new()),
            pool,
        }
    }

    /// Queues one packet, compressing it first if the envelope's policy asks for it.
    ///
    /// Must be called from within the tokio runtime.
    pub fn enqueue(&self, recipients: RecipientSet, packet: RawPacket, envelope: BatchEnvelope) {
        if recipients.is_empty() {
            return;
        }
        let slot = if envelope.needs_compression(&packet) {
            trace!("Compressing {} byte packet", packet.len());
            Slot::Compressing(self.pool.spawn(move || envelope.batch(&[packet])))
        } else {
            Slot::Ready(packet)
        };
        self.push(recipients, slot);
    }

    /// Queues several packets compressed together into a single batch
    pub fn enqueue_batch(
        &self,
        recipients: RecipientSet,
        packets: Vec<RawPacket>,
        envelope: BatchEnvelope,
    ) {
        if recipients.is_empty() || packets.is_empty() {
            return;
        }
        let slot = Slot::Compressing(self.pool.spawn(move || envelope.batch(&packets)));
        self.push(recipients, slot);
    }

    fn push(&self, recipients: RecipientSet, slot: Slot) {
        self.pending.lock().entry(recipients).or_default().push(slot);
    }

    /// Number of queued packets, counting each recipient set once
    pub fn len(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drains the queue, waiting for in-flight compression.
    ///
    /// Anything enqueued while this runs belongs to the next flush. A packet
    /// whose compression failed is dropped.
    pub async fn flush(&self) -> Vec<Delivery> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut deliveries = Vec::new();

        for (recipients, slots) in pending {
            for slot in slots {
                let packet = match slot {
                    Slot::Ready(packet) => packet,
                    Slot::Compressing(handle) => match handle.await {
                        Ok(Ok(packet)) => packet,
                        Ok(Err(e)) => {
                            error!("Dropping packet for {} peers: {}", recipients.len(), e);
                            continue;
                        }
                        Err(e) => {
                            error!("Compression task failed: {}", e);
                            continue;
                        }
                    },
                };
                deliveries.extend(recipients.iter().map(|addr| Delivery {
                    addr: *addr,
                    packet: packet.clone(),
                }));
            }
        }

        deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{BatchFraming, ByteOrder, COMPRESSION_THRESHOLD};
    use std::sync::Arc;

    const BATCH: u8 = 0x92;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn packet(len: usize, fill: u8) -> RawPacket {
        RawPacket::new(vec![fill; len], ByteOrder::BigEndian, addr(1))
    }

    fn envelope() -> BatchEnvelope {
        BatchEnvelope::new(BATCH, BatchFraming::LengthPrefixed)
    }

    fn queue() -> OutgoingQueue {
        OutgoingQueue::new(WorkerPool::new(2))
    }

    #[test]
    fn test_recipient_set_normalized() {
        let a: RecipientSet = vec![addr(3), addr(1), addr(3)].into_iter().collect();
        let b: RecipientSet = vec![addr(1), addr(3)].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.contains(&addr(3)));
    }

    #[tokio::test]
    async fn test_compression_threshold() {
        let queue = queue();
        let small = packet(COMPRESSION_THRESHOLD - 1, 0x85);
        let large = packet(COMPRESSION_THRESHOLD, 0x85);

        queue.enqueue(RecipientSet::single(addr(1)), small.clone(), envelope());
        queue.enqueue(RecipientSet::single(addr(1)), large.clone(), envelope());
        let deliveries = queue.flush().await;

        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].packet, small);
        assert!(envelope().is_batch(&deliveries[1].packet));
        let unpacked = envelope().unbatch(&deliveries[1].packet, |_| Ok(None)).unwrap();
        assert_eq!(unpacked, vec![large]);
    }

    #[tokio::test]
    async fn test_batches_are_not_rewrapped() {
        let queue = queue();
        let mut bytes = vec![BATCH];
        bytes.resize(COMPRESSION_THRESHOLD * 2, 0);
        let batch = RawPacket::new(bytes, ByteOrder::BigEndian, addr(1));

        queue.enqueue(RecipientSet::single(addr(1)), batch.clone(), envelope());
        assert_eq!(queue.flush().await[0].packet, batch);
    }

    #[tokio::test]
    async fn test_flush_preserves_enqueue_order() {
        let queue = queue();
        let recipients = RecipientSet::single(addr(9));
        // Interleave compressed and uncompressed packets
        for i in 0..10u8 {
            let len = if i % 2 == 0 { 4096 } else { 8 };
            queue.enqueue(recipients.clone(), packet(len, i), envelope());
        }

        let deliveries = queue.flush().await;
        assert_eq!(deliveries.len(), 10);
        for (i, delivery) in deliveries.iter().enumerate() {
            let original = if i % 2 == 0 {
                let mut inner = envelope().unbatch(&delivery.packet, |_| Ok(None)).unwrap();
                inner.remove(0)
            } else {
                delivery.packet.clone()
            };
            assert_eq!(original.bytes()[0], i as u8);
        }
    }

    #[tokio::test]
    async fn test_fan_out_per_recipient_set() {
        let queue = queue();
        let everyone: RecipientSet = vec![addr(1), addr(2), addr(3)].into_iter().collect();
        queue.enqueue(everyone, packet(10, 1), envelope());
        queue.enqueue(RecipientSet::single(addr(2)), packet(10, 2), envelope());

        let deliveries = queue.flush().await;
        let targets: Vec<(u16, u8)> = deliveries
            .iter()
            .map(|d| (d.addr.port(), d.packet.bytes()[0]))
            .collect();
        assert_eq!(targets, vec![(1, 1), (2, 1), (3, 1), (2, 2)]);
    }

    #[tokio::test]
    async fn test_flush_empties_queue() {
        let queue = queue();
        queue.enqueue(RecipientSet::single(addr(1)), packet(4, 1), envelope());
        assert_eq!(queue.len(), 1);
        queue.flush().await;
        assert!(queue.is_empty());
        assert!(queue.flush().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_batch_keeps_packet_order() {
        let queue = queue();
        let packets = vec![packet(3, 1), packet(3, 2), packet(3, 3)];
        queue.enqueue_batch(RecipientSet::single(addr(1)), packets.clone(), envelope());

        let deliveries = queue.flush().await;
        assert_eq!(deliveries.len(), 1);
        let unpacked = envelope().unbatch(&deliveries[0].packet, |_| Ok(None)).unwrap();
        assert_eq!(unpacked, packets);
    }

    #[tokio::test]
    async fn test_failed_compression_drops_only_that_packet() {
        let queue = queue();
        let mut nested = vec![BATCH];
        nested.resize(8, 0);
        let nested = RawPacket::new(nested, ByteOrder::BigEndian, addr(1));

        queue.enqueue_batch(RecipientSet::single(addr(1)), vec![nested], envelope());
        queue.enqueue(RecipientSet::single(addr(1)), packet(4, 7), envelope());

        let deliveries = queue.flush().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].packet.bytes()[0], 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_during_flush_delivers_each_packet_once() {
        let queue = Arc::new(queue());
        let total = 2000u32;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..total {
                    // Every third packet goes through compression
                    let len = if i % 3 == 0 { COMPRESSION_THRESHOLD + 64 } else { 16 };
                    let mut bytes = vec![0x10; len];
                    bytes[1..5].copy_from_slice(&i.to_be_bytes());
                    let packet = RawPacket::new(bytes, ByteOrder::BigEndian, addr(1));
                    queue.enqueue(RecipientSet::single(addr(1)), packet, envelope());
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut deliveries = Vec::new();
        while !producer.is_finished() {
            deliveries.extend(queue.flush().await);
            tokio::task::yield_now().await;
        }
        producer.await.unwrap();
        deliveries.extend(queue.flush().await);

        let mut seen: Vec<u32> = deliveries
            .iter()
            .map(|delivery| {
                let packet = if envelope().is_batch(&delivery.packet) {
                    envelope()
                        .unbatch(&delivery.packet, |_| Ok(None))
                        .unwrap()
                        .remove(0)
                } else {
                    delivery.packet.clone()
                };
                let mut id = [0u8; 4];
                id.copy_from_slice(&packet.bytes()[1..5]);
                u32::from_be_bytes(id)
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..total).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
