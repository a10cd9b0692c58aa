//! In-order reassembly of concurrently encoded video frames
//!
//! Frames are admitted in capture order and encoded in parallel. Encodes
//! finish in any order, but a frame is only flushed once every frame admitted
//! before it has been flushed too.
//!
//! ```text
//!   head                                   tail
//!   [ts=1 ready][ts=2 pending][ts=3 ready][ts=4 ready]
//!        │
//!        └─ moved to the outbox now; ts=3/4 wait until ts=2 completes
//! ```
//!
//! Completed prefixes move to an outbox under the queue lock. Whichever
//! completing task finds no flush in progress becomes the flusher and writes
//! the outbox in order with the queue lock released, so admission never
//! waits on the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::network::SessionConnection;
use crate::protocol::FrameHeader;

enum JobState {
    Pending,
    Ready(Bytes),
    Failed,
}

struct FrameJob {
    seq: u64,
    timestamp: i64,
    state: JobState,
}

/// Encoded frame waiting for its write
struct Outgoing {
    timestamp: i64,
    payload: Bytes,
}

struct QueueState {
    jobs: VecDeque<FrameJob>,
    /// Sequence number of `jobs[0]`
    head_seq: u64,
    next_seq: u64,
    /// In capture order, after every job still in `jobs`
    outbox: VecDeque<Outgoing>,
    flushing: bool,
}

impl QueueState {
    fn level(&self) -> usize {
        self.jobs.len() + self.outbox.len()
    }
}

/// Handle for one admitted frame, consumed by [`FrameQueue::complete`]
#[derive(Debug)]
pub struct JobTicket {
    seq: u64,
    timestamp: i64,
}

impl JobTicket {
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Bounded queue of in-flight frame jobs
pub struct FrameQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    admitted: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(capacity),
                head_seq: 0,
                next_seq: 0,
                outbox: VecDeque::with_capacity(capacity),
                flushing: false,
            }),
            capacity,
            admitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Append a pending job, or return `None` when the queue is full.
    /// Frames still waiting in the outbox count against the capacity.
    pub fn try_admit(&self, timestamp: i64) -> Option<JobTicket> {
        let mut state = self.state.lock();
        if state.level() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.push_back(FrameJob {
            seq,
            timestamp,
            state: JobState::Pending,
        });
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Some(JobTicket { seq, timestamp })
    }

    /// Record the encode result for `ticket` and flush the completed prefix
    /// to `connection`. `None` marks a failed encode; that job is consumed
    /// without sending. Returns the number of frames this call wrote; it is
    /// zero when another task is already flushing and picks them up instead.
    pub fn complete(
        &self,
        ticket: JobTicket,
        result: Option<Bytes>,
        connection: &SessionConnection,
    ) -> usize {
        {
            let mut state = self.state.lock();

            let Some(index) = ticket.seq.checked_sub(state.head_seq) else {
                return 0;
            };
            let Some(job) = state.jobs.get_mut(index as usize) else {
                return 0;
            };
            debug_assert_eq!(job.seq, ticket.seq);

            job.state = match result {
                Some(payload) => JobState::Ready(payload),
                None => JobState::Failed,
            };

            while matches!(
                state.jobs.front().map(|j| &j.state),
                Some(JobState::Ready(_) | JobState::Failed)
            ) {
                let Some(job) = state.jobs.pop_front() else {
                    break;
                };
                state.head_seq += 1;

                match job.state {
                    JobState::Ready(payload) => state.outbox.push_back(Outgoing {
                        timestamp: job.timestamp,
                        payload,
                    }),
                    JobState::Failed => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    JobState::Pending => unreachable!("head checked complete"),
                }
            }

            if state.flushing || state.outbox.is_empty() {
                return 0;
            }
            state.flushing = true;
        }

        self.drain_outbox(connection)
    }

    /// Write outbox entries until it is empty. Only the task that set
    /// `flushing` runs this.
    fn drain_outbox(&self, connection: &SessionConnection) -> usize {
        let mut flushed = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                let next = state.outbox.pop_front();
                if next.is_none() {
                    state.flushing = false;
                }
                next
            };
            let Some(frame) = next else {
                return flushed;
            };

            let header = FrameHeader::video(frame.timestamp, frame.payload.len()).encode();
            connection.send(&[&header[..], &frame.payload[..]]);
            self.flushed.fetch_add(1, Ordering::Relaxed);
            flushed += 1;
        }
    }

    /// Admitted frames not yet written or discarded
    pub fn len(&self) -> usize {
        self.state.lock().level()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            level: self.len(),
            capacity: self.capacity,
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Frame queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub level: usize,
    pub capacity: usize,
    pub admitted: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn drop_rate(&self) -> f32 {
        let offered = self.admitted + self.dropped;
        if offered == 0 {
            0.0
        } else {
            self.dropped as f32 / offered as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingLink;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn connected() -> (SessionConnection, RecordingLink) {
        let conn = SessionConnection::new();
        let link = RecordingLink::new();
        conn.replace(Box::new(link.clone()));
        (conn, link)
    }

    fn payload(ts: i64) -> Option<Bytes> {
        Some(Bytes::from(ts.to_le_bytes().to_vec()))
    }

    #[test]
    fn test_in_order_completion_flushes_immediately() {
        let (conn, link) = connected();
        let queue = FrameQueue::new(20);

        let t0 = queue.try_admit(100).unwrap();
        let t1 = queue.try_admit(200).unwrap();
        assert_eq!(queue.complete(t0, payload(100), &conn), 1);
        assert_eq!(queue.complete(t1, payload(200), &conn), 1);

        assert_eq!(link.video_timestamps(), vec![100, 200]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_out_of_order_waits_for_head() {
        let (conn, link) = connected();
        let queue = FrameQueue::new(20);

        let t0 = queue.try_admit(1).unwrap();
        let t1 = queue.try_admit(2).unwrap();
        let t2 = queue.try_admit(3).unwrap();

        assert_eq!(queue.complete(t2, payload(3), &conn), 0);
        assert_eq!(queue.complete(t1, payload(2), &conn), 0);
        assert!(link.writes().is_empty());

        assert_eq!(queue.complete(t0, payload(1), &conn), 3);
        assert_eq!(link.video_timestamps(), vec![1, 2, 3]);
    }

    #[test]
    fn test_record_layout() {
        let (conn, link) = connected();
        let queue = FrameQueue::new(20);

        let t = queue.try_admit(42).unwrap();
        queue.complete(t, Some(Bytes::from_static(b"jpegdata")), &conn);

        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        let header = FrameHeader::decode(&writes[0]).unwrap();
        assert_eq!(header, FrameHeader::video(42, 8));
        assert_eq!(&writes[0][FrameHeader::LEN..], b"jpegdata");
    }

    #[test]
    fn test_bounded_admission() {
        let queue = FrameQueue::new(20);
        let tickets: Vec<_> = (0..20).map(|i| queue.try_admit(i).unwrap()).collect();

        assert!(queue.try_admit(20).is_none());
        assert_eq!(queue.len(), 20);
        assert_eq!(queue.stats().dropped, 1);
        drop(tickets);
    }

    #[test]
    fn test_backpressure_recovery() {
        let (conn, link) = connected();
        let queue = FrameQueue::new(20);
        let tickets: Vec<_> = (0..20).map(|i| queue.try_admit(i).unwrap()).collect();
        assert!(queue.try_admit(99).is_none());

        for (i, ticket) in tickets.into_iter().enumerate() {
            queue.complete(ticket, payload(i as i64), &conn);
        }
        assert!(queue.is_empty());

        let next = queue.try_admit(20).unwrap();
        queue.complete(next, payload(20), &conn);
        assert_eq!(link.video_timestamps(), (0..=20).collect::<Vec<i64>>());
    }

    #[test]
    fn test_failed_encode_does_not_stall() {
        let (conn, link) = connected();
        let queue = FrameQueue::new(20);

        let t0 = queue.try_admit(1).unwrap();
        let t1 = queue.try_admit(2).unwrap();
        queue.complete(t1, payload(2), &conn);
        queue.complete(t0, None, &conn);

        assert_eq!(link.video_timestamps(), vec![2]);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().failed, 1);
    }

    #[test]
    fn test_flush_without_connection_consumes_jobs() {
        let conn = SessionConnection::new();
        let queue = FrameQueue::new(20);

        let t = queue.try_admit(5).unwrap();
        assert_eq!(queue.complete(t, payload(5), &conn), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_completions_keep_order() {
        let (conn, link) = connected();
        let conn = Arc::new(conn);
        let queue = Arc::new(FrameQueue::new(64));

        let tickets: Vec<_> = (0..64).map(|i| queue.try_admit(i).unwrap()).collect();
        let handles: Vec<_> = tickets
            .into_iter()
            .rev()
            .map(|ticket| {
                let queue = queue.clone();
                let conn = conn.clone();
                std::thread::spawn(move || {
                    let ts = ticket.timestamp();
                    queue.complete(ticket, payload(ts), &conn);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(link.video_timestamps(), (0..64).collect::<Vec<i64>>());
    }

    #[test]
    fn test_slow_viewer_does_not_block_admission() {
        let conn = Arc::new(SessionConnection::new());
        let link = RecordingLink::slow(Duration::from_millis(600));
        conn.replace(Box::new(link.clone()));
        let queue = Arc::new(FrameQueue::new(20));

        let t0 = queue.try_admit(1).unwrap();
        let t1 = queue.try_admit(2).unwrap();
        let writer = {
            let queue = queue.clone();
            let conn = conn.clone();
            std::thread::spawn(move || queue.complete(t0, payload(1), &conn))
        };
        std::thread::sleep(Duration::from_millis(100));

        // The writer is inside a 600 ms write; neither call may wait on it
        let started = Instant::now();
        let t2 = queue.try_admit(3);
        assert_eq!(queue.complete(t1, payload(2), &conn), 0);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(t2.is_some());

        // The active flusher picks up the frame completed meanwhile
        assert_eq!(writer.join().unwrap(), 2);
        assert_eq!(link.video_timestamps(), vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unwritten_frames_count_against_capacity() {
        let conn = Arc::new(SessionConnection::new());
        conn.replace(Box::new(RecordingLink::slow(Duration::from_millis(300))));
        let queue = Arc::new(FrameQueue::new(2));

        let t0 = queue.try_admit(1).unwrap();
        let t1 = queue.try_admit(2).unwrap();
        let writer = {
            let queue = queue.clone();
            let conn = conn.clone();
            std::thread::spawn(move || queue.complete(t0, payload(1), &conn))
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.complete(t1, payload(2), &conn);

        // Frame 2 waits in the outbox behind the slow write
        let _t2 = queue.try_admit(3).unwrap();
        assert!(queue.try_admit(4).is_none());
        writer.join().unwrap();
        assert!(queue.try_admit(5).is_some());
    }

    proptest! {
        #[test]
        fn flush_order_is_capture_order(
            order in Just((0..20usize).collect::<Vec<_>>()).prop_shuffle(),
            failed in proptest::collection::vec(any::<bool>(), 20),
        ) {
            let (conn, link) = connected();
            let queue = FrameQueue::new(20);

            let mut tickets: Vec<Option<JobTicket>> =
                (0..20).map(|i| queue.try_admit(i * 10).map(Some).unwrap()).collect();

            for &i in &order {
                let ticket = tickets[i].take().unwrap();
                let result = if failed[i] { None } else { payload(i as i64 * 10) };
                queue.complete(ticket, result, &conn);
            }

            let delivered = link.video_timestamps();
            prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(delivered.len(), failed.iter().filter(|f| !**f).count());
            prop_assert!(queue.is_empty());
        }
    }
}
