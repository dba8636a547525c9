//! Character-reveal queue.
//!
//! Text destined for headings, paragraphs and blockquotes is revealed
//! grapheme-by-grapheme to produce a natural typing feel. All reveal work for
//! one renderer goes through a single FIFO queue drained by one worker task,
//! so two overlapping reveals never interleave their characters and
//! completion order matches submission order. Cancellation (clear/dispose) is
//! an abort, not a rollback: pending jobs are dropped, already-revealed text
//! stays in the tree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use crate::tree::{NodeId, OutputTree};

/// Pacing knobs for the typing effect. All empirically tuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealPacing {
    /// Base delay after each grapheme.
    pub base_delay_ms: u64,
    /// Random jitter as a fraction of the base delay (0.5 = ±50%).
    pub jitter: f64,
    /// Extra pause after sentence-ending punctuation.
    pub sentence_pause_ms: u64,
    /// Smaller extra pause after word boundaries.
    pub word_pause_ms: u64,
}

impl Default for RevealPacing {
    fn default() -> Self {
        Self {
            base_delay_ms: 16,
            jitter: 0.5,
            sentence_pause_ms: 180,
            word_pause_ms: 30,
        }
    }
}

impl RevealPacing {
    /// No delays at all; reveal degenerates to an ordered atomic append.
    pub fn instant() -> Self {
        Self {
            base_delay_ms: 0,
            jitter: 0.0,
            sentence_pause_ms: 0,
            word_pause_ms: 0,
        }
    }

    fn delay_for(&self, grapheme: &str) -> Duration {
        let base = self.base_delay_ms as f64;
        let jitter = if self.jitter > 0.0 {
            base * self.jitter * (rand::random::<f64>() * 2.0 - 1.0)
        } else {
            0.0
        };
        let mut ms = (base + jitter).max(0.0);
        if grapheme.ends_with(['.', '!', '?']) {
            ms += self.sentence_pause_ms as f64;
        } else if grapheme.chars().all(char::is_whitespace) {
            ms += self.word_pause_ms as f64;
        }
        Duration::from_millis(ms as u64)
    }
}

enum RevealJob {
    Text { node: NodeId, content: String },
    /// Barrier: resolves once every job queued before it has completed.
    Flush(oneshot::Sender<()>),
}

/// Per-renderer reveal queue: unbounded FIFO, single consumer task.
pub struct RevealQueue {
    tree: Arc<Mutex<OutputTree>>,
    pacing: RevealPacing,
    pending: Arc<Mutex<HashMap<NodeId, usize>>>,
    tx: mpsc::UnboundedSender<RevealJob>,
    cancel: CancellationToken,
}

impl RevealQueue {
    /// Spawns the worker task; must be called within a tokio runtime.
    pub fn new(tree: Arc<Mutex<OutputTree>>, pacing: RevealPacing) -> Self {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, cancel) = spawn_worker(
            Arc::clone(&tree),
            pacing.clone(),
            Arc::clone(&pending),
        );
        Self {
            tree,
            pacing,
            pending,
            tx,
            cancel,
        }
    }

    /// Queues `content` for grapheme-by-grapheme insertion into `node`.
    pub async fn enqueue(&self, node: NodeId, content: String) {
        if content.is_empty() {
            return;
        }
        *self.pending.lock().await.entry(node).or_insert(0) += 1;
        if self
            .tx
            .send(RevealJob::Text { node, content })
            .is_err()
        {
            tracing::warn!(?node, "reveal worker is gone; queued content dropped");
            decrement(&mut *self.pending.lock().await, node);
        }
    }

    /// True while at least one queued or in-flight reveal targets `node`.
    pub async fn is_pending(&self, node: NodeId) -> bool {
        self.pending.lock().await.contains_key(&node)
    }

    /// Waits until every reveal queued so far has completed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(RevealJob::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Aborts all pending reveals and restarts the worker with an empty
    /// queue. Text already revealed stays where it is.
    pub async fn clear(&mut self) {
        self.cancel.cancel();
        self.pending.lock().await.clear();
        let (tx, cancel) = spawn_worker(
            Arc::clone(&self.tree),
            self.pacing.clone(),
            Arc::clone(&self.pending),
        );
        self.tx = tx;
        self.cancel = cancel;
    }

    /// Stops the worker without replacing it. Used on dispose.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn spawn_worker(
    tree: Arc<Mutex<OutputTree>>,
    pacing: RevealPacing,
    pending: Arc<Mutex<HashMap<NodeId, usize>>>,
) -> (mpsc::UnboundedSender<RevealJob>, CancellationToken) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RevealJob>();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if token.is_cancelled() {
                break;
            }
            match job {
                RevealJob::Flush(done) => {
                    let _ = done.send(());
                }
                RevealJob::Text { node, content } => {
                    reveal_text(&tree, &pacing, &token, node, &content).await;
                    // A cancelled generation must not touch the pending map:
                    // clear() has already wiped it, and node ids may have
                    // been reissued to the replacement worker by now.
                    if !token.is_cancelled() {
                        decrement(&mut *pending.lock().await, node);
                    }
                }
            }
        }
    });
    (tx, cancel)
}

fn decrement(pending: &mut HashMap<NodeId, usize>, node: NodeId) {
    if let Some(count) = pending.get_mut(&node) {
        *count -= 1;
        if *count == 0 {
            pending.remove(&node);
        }
    }
}

async fn reveal_text(
    tree: &Arc<Mutex<OutputTree>>,
    pacing: &RevealPacing,
    token: &CancellationToken,
    node: NodeId,
    content: &str,
) {
    let mut offset = 0usize;
    for grapheme in content.graphemes(true) {
        if token.is_cancelled() {
            return;
        }
        {
            let mut tree = tree.lock().await;
            if tree.push_text(node, grapheme).is_err() {
                // Mid-stream failure: fall back to one atomic append of the
                // remainder instead of dropping it.
                let rest = &content[offset..];
                if tree.push_text(node, rest).is_err() {
                    tracing::warn!(?node, "reveal target unavailable; content dropped");
                }
                return;
            }
        }
        offset += grapheme.len();
        let delay = pacing.delay_for(grapheme);
        if !delay.is_zero() {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    fn pacing_no_jitter() -> RevealPacing {
        RevealPacing {
            jitter: 0.0,
            ..RevealPacing::default()
        }
    }

    #[test]
    fn sentence_pause_extends_delay() {
        let pacing = pacing_no_jitter();
        let plain = pacing.delay_for("a");
        let sentence = pacing.delay_for(".");
        let word = pacing.delay_for(" ");
        assert!(sentence > word, "{sentence:?} vs {word:?}");
        assert!(word > plain, "{word:?} vs {plain:?}");
    }

    #[test]
    fn instant_pacing_has_no_delay() {
        assert!(RevealPacing::instant().delay_for(".").is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_waits_for_completion() {
        let tree = Arc::new(Mutex::new(OutputTree::new()));
        let node = {
            let mut tree = tree.lock().await;
            let root = tree.root();
            let id = tree.create_node(NodeKind::Paragraph);
            tree.append_child(root, id).unwrap();
            id
        };
        let queue = RevealQueue::new(Arc::clone(&tree), pacing_no_jitter());
        queue.enqueue(node, "Hello there.".to_string()).await;
        queue.flush().await;

        let tree = tree.lock().await;
        assert_eq!(tree.text(node), Some("Hello there."));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_aborts_without_rollback() {
        let tree = Arc::new(Mutex::new(OutputTree::new()));
        let node = {
            let mut tree = tree.lock().await;
            let root = tree.root();
            let id = tree.create_node(NodeKind::Paragraph);
            tree.append_child(root, id).unwrap();
            id
        };
        let mut queue = RevealQueue::new(Arc::clone(&tree), pacing_no_jitter());
        let content = "a long stretch of text that will not finish in time";
        queue.enqueue(node, content.to_string()).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        queue.clear().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_clear = tree.lock().await.text(node).unwrap().len();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let much_later = tree.lock().await.text(node).unwrap().len();

        assert!(after_clear < content.len(), "reveal should have been cut short");
        assert_eq!(after_clear, much_later, "no reveal work after clear");
        assert!(!queue.is_pending(node).await);
    }
}
