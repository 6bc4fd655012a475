//! Interruption-aware playback queue.
//!
//! A single worker owns the priority queue and the output device. Items
//! play strictly one at a time; `stop_all` is the barge-in kill-switch: it
//! halts the active item, discards everything queued (running disposal
//! hooks), releases the device, and emits exactly one `Stopped` event.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::item::PlaylistItem;
use super::sink::{AudioSink, PlaybackError, SinkProvider};

/// Commands accepted by the queue worker.
#[derive(Debug)]
pub enum PlaybackCommand {
    Enqueue(PlaylistItem),
    /// Halt the active item and move on to the next queued one.
    SkipToNext,
    /// Halt everything and flush the queue.
    StopAll,
    Shutdown,
}

/// Notifications emitted by the queue worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { label: String },
    Finished { label: String },
    /// One item failed to decode or render; the queue continues.
    Failed { label: String, error: String },
    /// The queue emptied naturally and the device was released.
    Drained,
    /// `stop_all` completed. Emitted exactly once per call.
    Stopped,
}

/// Heap entry: priority first (higher plays first), insertion order as the
/// stable tie-break.
struct QueuedItem {
    seq: u64,
    item: PlaylistItem,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.item.priority == other.item.priority && self.seq == other.seq
    }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cloneable handle to the playback worker.
#[derive(Clone)]
pub struct PlaybackQueue {
    cmd_tx: mpsc::UnboundedSender<PlaybackCommand>,
    depth_rx: watch::Receiver<usize>,
}

impl PlaybackQueue {
    /// Start the worker. The output device is not touched until the first
    /// item plays.
    pub fn spawn(
        provider: Arc<dyn SinkProvider>,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (depth_tx, depth_rx) = watch::channel(0usize);
        let worker = Worker {
            provider,
            events,
            depth: depth_tx,
            heap: BinaryHeap::new(),
            next_seq: 0,
            playing: false,
        };
        let join = tokio::spawn(worker.run(cmd_rx));
        (Self { cmd_tx, depth_rx }, join)
    }

    pub fn enqueue(&self, item: PlaylistItem) {
        if self.cmd_tx.send(PlaybackCommand::Enqueue(item)).is_err() {
            // Worker is gone; the item's disposer already ran on drop.
            warn!("playback queue is closed; item discarded");
        }
    }

    pub fn skip_to_next(&self) {
        let _ = self.cmd_tx.send(PlaybackCommand::SkipToNext);
    }

    /// Barge-in: halt playback, flush the queue, release the device.
    pub fn stop_all(&self) {
        let _ = self.cmd_tx.send(PlaybackCommand::StopAll);
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PlaybackCommand::Shutdown);
    }

    /// Observable queue depth: queued items plus the one playing.
    pub fn queue_depth(&self) -> watch::Receiver<usize> {
        self.depth_rx.clone()
    }

    /// Snapshot of the current depth.
    pub fn depth(&self) -> usize {
        *self.depth_rx.borrow()
    }
}

enum PlayResult {
    Done(Result<(), PlaybackError>),
    Interrupted,
    Shutdown,
}

enum Outcome {
    Drained,
    Stopped,
    Shutdown,
}

struct Worker {
    provider: Arc<dyn SinkProvider>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    depth: watch::Sender<usize>,
    heap: BinaryHeap<QueuedItem>,
    next_seq: u64,
    playing: bool,
}

impl Worker {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<PlaybackCommand>) {
        loop {
            // Idle: nothing queued, no device held.
            let Some(cmd) = cmd_rx.recv().await else { break };
            match cmd {
                PlaybackCommand::Enqueue(item) => self.push(item),
                PlaybackCommand::SkipToNext => continue,
                PlaybackCommand::StopAll => {
                    self.clear_queue();
                    self.emit(PlaybackEvent::Stopped);
                    continue;
                }
                PlaybackCommand::Shutdown => break,
            }

            let mut sink: Option<Box<dyn AudioSink>> = None;
            let outcome = self.play_until_drained(&mut cmd_rx, &mut sink).await;
            // Release the device whatever happened.
            drop(sink);
            match outcome {
                Outcome::Drained => self.emit(PlaybackEvent::Drained),
                Outcome::Stopped => self.emit(PlaybackEvent::Stopped),
                Outcome::Shutdown => break,
            }
        }
        self.clear_queue();
        debug!("playback worker exited");
    }

    /// Play queued items in order until the queue drains or a stop arrives.
    async fn play_until_drained(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<PlaybackCommand>,
        sink_slot: &mut Option<Box<dyn AudioSink>>,
    ) -> Outcome {
        while let Some(queued) = self.pop() {
            let item = queued.item;

            if sink_slot.is_none() {
                match self.provider.acquire() {
                    Ok(acquired) => *sink_slot = Some(acquired),
                    Err(e) => {
                        warn!("output device unavailable: {e}");
                        self.emit(PlaybackEvent::Failed {
                            label: item.label(),
                            error: e.to_string(),
                        });
                        self.finish_item(item);
                        continue;
                    }
                }
            }
            let Some(sink) = sink_slot.as_ref() else {
                continue;
            };

            debug!("playing {}", item.label());
            self.emit(PlaybackEvent::Started {
                label: item.label(),
            });

            let result = {
                let play = sink.play(&item.audio, &item.mime);
                tokio::pin!(play);
                loop {
                    tokio::select! {
                        res = &mut play => break PlayResult::Done(res),
                        cmd = cmd_rx.recv() => match cmd {
                            None | Some(PlaybackCommand::Shutdown) => {
                                sink.halt();
                                break PlayResult::Shutdown;
                            }
                            Some(PlaybackCommand::Enqueue(new_item)) => self.push(new_item),
                            Some(PlaybackCommand::SkipToNext) => {
                                debug!("skipping {}", item.label());
                                sink.halt();
                            }
                            Some(PlaybackCommand::StopAll) => {
                                sink.halt();
                                break PlayResult::Interrupted;
                            }
                        },
                    }
                }
            };

            match result {
                PlayResult::Done(Ok(())) => {
                    self.emit(PlaybackEvent::Finished {
                        label: item.label(),
                    });
                    self.finish_item(item);
                }
                PlayResult::Done(Err(e)) => {
                    warn!("playback of {} failed: {e}", item.label());
                    self.emit(PlaybackEvent::Failed {
                        label: item.label(),
                        error: e.to_string(),
                    });
                    self.finish_item(item);
                }
                PlayResult::Interrupted => {
                    drop(item);
                    self.playing = false;
                    self.clear_queue();
                    return Outcome::Stopped;
                }
                PlayResult::Shutdown => {
                    drop(item);
                    self.playing = false;
                    self.clear_queue();
                    return Outcome::Shutdown;
                }
            }
        }
        Outcome::Drained
    }

    fn push(&mut self, item: PlaylistItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedItem { seq, item });
        self.update_depth();
    }

    fn pop(&mut self) -> Option<QueuedItem> {
        let queued = self.heap.pop()?;
        self.playing = true;
        self.update_depth();
        Some(queued)
    }

    /// Dispose a finished item and publish the new depth.
    fn finish_item(&mut self, item: PlaylistItem) {
        drop(item);
        self.playing = false;
        self.update_depth();
    }

    fn clear_queue(&mut self) {
        let discarded = self.heap.len();
        // Dropping runs each item's disposal hook.
        self.heap.clear();
        if discarded > 0 {
            debug!("discarded {discarded} queued item(s)");
        }
        self.update_depth();
    }

    fn update_depth(&self) {
        let depth = self.heap.len() + usize::from(self.playing);
        let _ = self.depth.send(depth);
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn queued(priority: i32, seq: u64) -> QueuedItem {
        QueuedItem {
            seq,
            item: PlaylistItem::new(Bytes::from_static(b"x"), "audio/pcm").with_priority(priority),
        }
    }

    #[test]
    fn equal_priority_orders_by_insertion() {
        let mut heap = BinaryHeap::new();
        heap.push(queued(0, 2));
        heap.push(queued(0, 0));
        heap.push(queued(0, 1));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|q| q.seq).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn higher_priority_jumps_the_queue() {
        let mut heap = BinaryHeap::new();
        heap.push(queued(0, 0));
        heap.push(queued(5, 1));
        heap.push(queued(0, 2));
        let order: Vec<(i32, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|q| (q.item.priority, q.seq))
            .collect();
        assert_eq!(order, vec![(5, 1), (0, 0), (0, 2)]);
    }
}
