//! Bounded, priority-aware packet queue backed by a fixed slot pool.
//!
//! All slots are allocated up front. A slot is either on the free stack or in
//! exactly one priority list, and it only moves between the two under the
//! queue lock. Lower class indices are served first; higher class indices are
//! the preferred eviction victims when admission needs room.

use std::collections::{TryReserveError, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{EnqueueError, ResourceError};
use crate::packet::Packet;

/// Index of a slot in the pool arena.
type SlotId = u32;

/// Point-in-time view of the queue's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Packets present across all classes.
    pub queued: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    pub free_slots: usize,
    /// Depth of each priority class, indexed by class.
    pub per_class: Vec<usize>,
    /// Packets discarded to admit more important ones.
    pub evicted: u64,
    /// Packets refused at admission.
    pub rejected: u64,
}

struct Pool {
    slots: Box<[Packet]>,
    free: Vec<SlotId>,
    classes: Box<[VecDeque<SlotId>]>,
    size_bytes: usize,
    queued: usize,
    evicted: u64,
    rejected: u64,
}

impl Pool {
    fn packet_len(&self, slot: SlotId) -> usize {
        self.slots[slot as usize].len()
    }

    /// Works out how many evictions admission of a `len` byte packet needs,
    /// without touching any state.
    fn plan_admission(
        &self,
        len: usize,
        priority: usize,
        capacity_bytes: usize,
    ) -> Result<usize, EnqueueError> {
        // Victims in the order `evict_one` takes them: least important class
        // first, oldest packet first within a class.
        let mut candidates = self.classes[priority + 1..]
            .iter()
            .rev()
            .flat_map(|list| list.iter())
            .map(|&slot| self.packet_len(slot));

        let mut free = self.free.len();
        let mut size = self.size_bytes;
        let mut victims = 0;

        while free == 0 {
            let Some(victim_len) = candidates.next() else {
                return Err(EnqueueError::NoFreeSlot { priority });
            };
            free += 1;
            size -= victim_len;
            victims += 1;
        }

        while size + len > capacity_bytes {
            let Some(victim_len) = candidates.next() else {
                return Err(EnqueueError::ByteCapacity { len, priority });
            };
            size -= victim_len;
            victims += 1;
        }

        Ok(victims)
    }

    /// Drops the oldest packet of the least important non-empty class below
    /// `priority`. Returns the victim's class and length.
    fn evict_one(&mut self, priority: usize) -> Option<(usize, usize)> {
        let class = (priority + 1..self.classes.len())
            .rev()
            .find(|&class| !self.classes[class].is_empty())?;
        let slot = self.classes[class].pop_front()?;
        let len = self.packet_len(slot);

        self.free.push(slot);
        self.size_bytes -= len;
        self.queued -= 1;
        self.evicted += 1;
        Some((class, len))
    }

    fn push(&mut self, packet: &Packet, priority: usize) -> bool {
        let Some(slot) = self.free.pop() else {
            return false;
        };
        self.slots[slot as usize].copy_from(packet);
        self.classes[priority].push_back(slot);
        self.size_bytes += packet.len();
        self.queued += 1;
        true
    }

    fn pop(&mut self) -> Option<Packet> {
        let slot = self
            .classes
            .iter_mut()
            .find_map(|list| list.pop_front())?;

        // Copy out while the lock is held: the slot goes back on the free
        // stack and may be overwritten as soon as the lock is released.
        let packet = self.slots[slot as usize].clone();
        self.free.push(slot);
        self.size_bytes -= packet.len();
        self.queued -= 1;
        Some(packet)
    }
}

/// Packet queue shared between the enqueue and dequeue pumps.
pub struct PacketQueue {
    pool: Mutex<Pool>,
    available: Notify,
    capacity_bytes: usize,
    backlog: usize,
    priorities: usize,
}

impl PacketQueue {
    /// Creates a queue holding at most `capacity_bytes` of payload in
    /// `backlog` preallocated slots spread over `priorities` classes.
    pub fn new(
        capacity_bytes: usize,
        backlog: usize,
        priorities: usize,
    ) -> Result<Self, ResourceError> {
        if capacity_bytes == 0 {
            return Err(ResourceError::ZeroCapacity);
        }
        if backlog == 0 {
            return Err(ResourceError::ZeroBacklog);
        }
        if priorities == 0 {
            return Err(ResourceError::NoPriorityClasses);
        }
        if SlotId::try_from(backlog).is_err() {
            return Err(ResourceError::Allocation { slots: backlog });
        }

        let alloc_failed = |_: TryReserveError| ResourceError::Allocation { slots: backlog };

        let mut slots = Vec::new();
        slots.try_reserve_exact(backlog).map_err(alloc_failed)?;
        slots.resize_with(backlog, Packet::new);

        let mut free = Vec::new();
        free.try_reserve_exact(backlog).map_err(alloc_failed)?;
        free.extend((0..backlog as SlotId).rev());

        // Each list can hold the whole backlog, so pushes never reallocate.
        let mut classes = Vec::with_capacity(priorities);
        for _ in 0..priorities {
            let mut list = VecDeque::new();
            list.try_reserve_exact(backlog).map_err(alloc_failed)?;
            classes.push(list);
        }

        debug!(capacity_bytes, backlog, priorities, "packet queue initialized");

        Ok(Self {
            pool: Mutex::new(Pool {
                slots: slots.into_boxed_slice(),
                free,
                classes: classes.into_boxed_slice(),
                size_bytes: 0,
                queued: 0,
                evicted: 0,
                rejected: 0,
            }),
            available: Notify::new(),
            capacity_bytes,
            backlog,
            priorities,
        })
    }

    /// Admits `packet` into class `priority`, evicting older packets of less
    /// important classes if that is what it takes to find a slot and stay
    /// under the byte ceiling.
    ///
    /// On error the queue is left exactly as it was.
    pub fn enqueue(&self, packet: &Packet, priority: usize) -> Result<(), EnqueueError> {
        if priority >= self.priorities {
            return Err(EnqueueError::UnknownPriority {
                priority,
                classes: self.priorities,
            });
        }

        let mut pool = self.pool.lock();

        let victims = match pool.plan_admission(packet.len(), priority, self.capacity_bytes) {
            Ok(victims) => victims,
            Err(err) => {
                pool.rejected += 1;
                return Err(err);
            }
        };

        for _ in 0..victims {
            if let Some((class, len)) = pool.evict_one(priority) {
                debug!(victim_class = class, len, priority, "evicted queued packet");
            }
        }

        if !pool.push(packet, priority) {
            pool.rejected += 1;
            return Err(EnqueueError::NoFreeSlot { priority });
        }
        trace!(len = packet.len(), priority, size = pool.size_bytes, "packet enqueued");
        drop(pool);

        self.available.notify_one();
        Ok(())
    }

    /// Waits for a packet and returns the head of the most important
    /// non-empty class.
    pub async fn dequeue(&self) -> Packet {
        loop {
            if let Some(packet) = self.try_dequeue() {
                return packet;
            }
            // A wakeup may be left over from a packet that was evicted in the
            // meantime, hence the loop.
            self.available.notified().await;
        }
    }

    /// Non-blocking variant of [`PacketQueue::dequeue`].
    pub fn try_dequeue(&self) -> Option<Packet> {
        self.pool.lock().pop()
    }

    /// Number of packets currently queued.
    pub fn len(&self) -> usize {
        self.pool.lock().queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.pool.lock().size_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn backlog(&self) -> usize {
        self.backlog
    }

    pub fn priorities(&self) -> usize {
        self.priorities
    }

    pub fn stats(&self) -> QueueStats {
        let pool = self.pool.lock();
        QueueStats {
            queued: pool.queued,
            size_bytes: pool.size_bytes,
            capacity_bytes: self.capacity_bytes,
            free_slots: pool.free.len(),
            per_class: pool.classes.iter().map(VecDeque::len).collect(),
            evicted: pool.evicted,
            rejected: pool.rejected,
        }
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketQueue")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("backlog", &self.backlog)
            .field("priorities", &self.priorities)
            .finish_non_exhaustive()
    }
}
