use std::collections::VecDeque;
use std::sync::Mutex;

use super::status::ChangeData;
use crate::utils;

/// StatusChangeNode is one recorded transition. `seq` is monotonic and
/// contiguous within a stream; a stream ends when the resource is deleted
/// and the sequence resets to zero.
#[derive(Debug, Clone)]
pub struct StatusChangeNode {
    pub seq: u64,
    pub time_ms: u64,
    pub data: ChangeData,
}

/// DrainedChanges is the detached chain a reader consumes outside the
/// lock: the nodes in append order, the sequence counter at drain time
/// (zero means the stream was reset), and the node count.
#[derive(Debug)]
pub struct DrainedChanges {
    pub nodes: Vec<StatusChangeNode>,
    pub seq: u64,
    pub count: usize,
}

struct ListInner {
    next_seq: u64,
    nodes: VecDeque<StatusChangeNode>,
}

/// StatusChangeList is the per-resource append-only log of transitions,
/// consumed drain-style by metrics sinks. Appends serialize through a
/// short critical section; `drain` detaches the whole chain atomically so
/// readers never hold the lock while consuming.
pub struct StatusChangeList {
    inner: Mutex<ListInner>,
}

impl Default for StatusChangeList {
    fn default() -> Self {
        StatusChangeList {
            inner: Mutex::new(ListInner {
                next_seq: 0,
                nodes: VecDeque::new(),
            }),
        }
    }
}

impl StatusChangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one node, assigning the next sequence number. Returns the
    /// assigned sequence.
    pub fn append(&self, data: ChangeData) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.nodes.push_back(StatusChangeNode {
            seq,
            time_ms: utils::curr_time_millis(),
            data,
        });
        seq
    }

    /// Append one node and mark the end of the stream: the sequence
    /// counter resets to zero so consumers know the stream restarted.
    pub fn append_deleted(&self, data: ChangeData) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.nodes.push_back(StatusChangeNode {
            seq,
            time_ms: utils::curr_time_millis(),
            data,
        });
        inner.next_seq = 0;
        seq
    }

    /// Atomically detach the current chain and reset the list to empty.
    pub fn drain(&self) -> DrainedChanges {
        let mut inner = self.inner.lock().unwrap();
        let nodes: Vec<StatusChangeNode> = inner.nodes.drain(..).collect();
        let count = nodes.len();
        DrainedChanges {
            nodes,
            seq: inner.next_seq,
            count,
        }
    }
}
