use core::future::poll_fn;

use embassy_futures::select::{select, Either};
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{with_timeout, Duration, Instant, Timer};

use crate::{record::CaptureRecord, DefaultRawMutex};

/// The default number of records, which can be waiting for the consumer.
pub const DEFAULT_QUEUE_LEN: usize = 128;

/// A bounded FIFO of [CaptureRecord]s, handing them from the producer to the consumer.
///
/// Pushing never blocks for longer than the specified timeout. If the queue is full, the
/// record is handed back to the caller, which usually just drops it.
pub struct WorkQueue<const N: usize = DEFAULT_QUEUE_LEN> {
    channel: Channel<DefaultRawMutex, CaptureRecord, N>,
}
impl<const N: usize> WorkQueue<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }
    /// Push a record without waiting.
    ///
    /// This is safe to call from interrupt context.
    pub fn try_push(&self, record: CaptureRecord) -> Result<(), CaptureRecord> {
        self.channel.try_send(record).map_err(|err| match err {
            TrySendError::Full(record) => record,
        })
    }
    /// Push a record, waiting up to `timeout` for a slot to become free.
    pub async fn push(&self, record: CaptureRecord, timeout: Duration) -> Result<(), CaptureRecord> {
        let deadline = Instant::now() + timeout;
        let mut record = record;
        loop {
            match self.try_push(record) {
                Ok(()) => return Ok(()),
                Err(rejected) => record = rejected,
            }
            let slot_free = poll_fn(|cx| self.channel.poll_ready_to_send(cx));
            if let Either::Second(()) = select(slot_free, Timer::at(deadline)).await {
                // One last attempt, the consumer may have raced the timer.
                return self.try_push(record);
            }
        }
    }
    /// Take the oldest record, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Option<CaptureRecord> {
        with_timeout(timeout, self.channel.receive()).await.ok()
    }
    /// Take the oldest record, if there is one.
    pub fn try_pop(&self) -> Option<CaptureRecord> {
        self.channel.try_receive().ok()
    }
    /// Drop all queued records, returning how many there were.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.try_pop().is_some() {
            drained += 1;
        }
        drained
    }
    pub fn len(&self) -> usize {
        self.channel.len()
    }
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
    pub const fn capacity(&self) -> usize {
        N
    }
}
impl<const N: usize> Default for WorkQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    fn record(tag: u8) -> CaptureRecord {
        CaptureRecord::try_new(tag as u32, 1, &[tag]).unwrap()
    }

    #[test]
    fn backpressure_hands_records_back() {
        let queue = WorkQueue::<4>::new();
        let mut accepted = 0;
        let mut rejected = std::vec::Vec::new();
        for tag in 0..10 {
            match queue.try_push(record(tag)) {
                Ok(()) => accepted += 1,
                Err(record) => rejected.push(record),
            }
        }
        assert_eq!(accepted, queue.capacity());
        assert_eq!(rejected.len(), 6);
        // Ownership of the rejected records came back intact.
        assert_eq!(rejected[0].payload(), &[4]);
        assert_eq!(rejected[5].payload(), &[9]);
    }

    #[test]
    fn timed_push_gives_up() {
        let queue = WorkQueue::<1>::new();
        queue.try_push(record(1)).unwrap();
        let started = Instant::now();
        let res = block_on(queue.push(record(2), Duration::from_millis(20)));
        assert_eq!(res.unwrap_err().payload(), &[2]);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn fifo_order_and_pop_timeout() {
        let queue = WorkQueue::<8>::new();
        for tag in 0..3 {
            block_on(queue.push(record(tag), Duration::from_millis(10))).unwrap();
        }
        assert_eq!(queue.len(), 3);
        for tag in 0..3 {
            let popped = block_on(queue.pop(Duration::from_millis(10))).unwrap();
            assert_eq!(popped.payload(), &[tag]);
        }
        assert!(block_on(queue.pop(Duration::from_millis(10))).is_none());
    }

    #[test]
    fn drain_empties_the_queue() {
        let queue = WorkQueue::<8>::new();
        for tag in 0..5 {
            queue.try_push(record(tag)).unwrap();
        }
        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
    }
}
