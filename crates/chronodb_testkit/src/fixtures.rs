//! Test fixtures and node helpers.
//!
//! A [`TestNode`] keeps hold of the storage its node runs on, so a test can
//! close the node and open a new one over the same bytes.

use chronodb_core::{BitemporalInstant, Config, Document, Node, Operation};
use chronodb_storage::InMemoryBackend;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tempfile::TempDir;

/// How long fixtures wait for the background indexer.
pub const AWAIT_TIMEOUT: Duration = Duration::from_secs(10);

enum Storage {
    Memory {
        log: InMemoryBackend,
        documents: InMemoryBackend,
    },
    Directory(TempDir),
}

/// A node with storage that outlives it.
pub struct TestNode {
    /// The node instance.
    pub node: Node,
    config: Config,
    storage: Storage,
}

impl TestNode {
    /// An in-memory node without a background indexer. Drive indexing with
    /// [`Node::index_pending`] or [`commit`](Self::commit).
    pub fn manual() -> Self {
        Self::memory(Config::default().background_indexing(false))
    }

    /// An in-memory node with the background indexer running.
    pub fn background() -> Self {
        Self::memory(Config::default())
    }

    /// An in-memory node with `config`.
    pub fn memory(config: Config) -> Self {
        let log = InMemoryBackend::new();
        let documents = InMemoryBackend::new();
        let node = Node::open_with_backends(
            config.clone(),
            Box::new(log.share()),
            Box::new(documents.share()),
        )
        .expect("Failed to open in-memory node");
        Self {
            node,
            config,
            storage: Storage::Memory { log, documents },
        }
    }

    /// A node in a temporary directory, removed when the fixture drops.
    pub fn file(config: Config) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let node = Node::open(dir.path(), config.clone()).expect("Failed to open file node");
        Self {
            node,
            config,
            storage: Storage::Directory(dir),
        }
    }

    /// Closes the node and opens a new one over the same storage.
    pub fn reopen(self) -> Self {
        let Self {
            node,
            config,
            storage,
        } = self;
        node.close().expect("Failed to close node");
        drop(node);
        let node = open_over(&storage, &config).expect("Failed to reopen node");
        Self {
            node,
            config,
            storage,
        }
    }

    /// Like [`reopen`](Self::reopen), but hands back the open error.
    pub fn try_reopen(self) -> chronodb_core::CoreResult<Node> {
        let Self {
            node,
            config,
            storage,
        } = self;
        node.close().expect("Failed to close node");
        drop(node);
        open_over(&storage, &config)
    }

    /// The transaction log bytes, for in-memory nodes.
    pub fn log_backend(&self) -> Option<&InMemoryBackend> {
        match &self.storage {
            Storage::Memory { log, .. } => Some(log),
            Storage::Directory(_) => None,
        }
    }

    /// The document store bytes, for in-memory nodes.
    pub fn document_backend(&self) -> Option<&InMemoryBackend> {
        match &self.storage {
            Storage::Memory { documents, .. } => Some(documents),
            Storage::Directory(_) => None,
        }
    }

    /// The node directory, for file nodes.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Directory(dir) => Some(dir.path()),
            Storage::Memory { .. } => None,
        }
    }

    /// Submits a transaction.
    pub fn submit(&self, operations: &[Operation]) -> BitemporalInstant {
        self.node.submit_tx(operations).expect("Failed to submit transaction")
    }

    /// Submits a transaction and waits until it is indexed.
    pub fn commit(&self, operations: &[Operation]) -> BitemporalInstant {
        let tx = self.submit(operations);
        self.catch_up();
        tx
    }

    /// Indexes everything submitted so far.
    pub fn catch_up(&self) {
        if self.config.background_indexing {
            self.node.sync(Some(AWAIT_TIMEOUT)).expect("Failed to sync");
        } else {
            self.node.index_pending().expect("Failed to index");
        }
    }
}

fn open_over(storage: &Storage, config: &Config) -> chronodb_core::CoreResult<Node> {
    match storage {
        Storage::Memory { log, documents } => Node::open_with_backends(
            config.clone(),
            Box::new(log.share()),
            Box::new(documents.share()),
        ),
        Storage::Directory(dir) => Node::open(dir.path(), config.clone()),
    }
}

impl std::ops::Deref for TestNode {
    type Target = Node;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

/// A one-field document: `{"n": n}`.
pub fn doc(n: i64) -> Document {
    Document::new().with("n", n)
}

/// Installs a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronodb_core::TransactionBuilder;

    #[test]
    fn reopened_memory_nodes_keep_their_log() {
        let node = TestNode::manual();
        let tx = node.commit(&TransactionBuilder::new().put("a", doc(1)).build());
        let node = node.reopen();
        assert_eq!(node.latest_submitted_tx(), Some(tx));
        assert_eq!(node.latest_completed_tx(), None);
        node.catch_up();
        assert_eq!(node.latest_completed_tx(), Some(tx));
    }

    #[test]
    fn file_nodes_live_in_their_directory() {
        let node = TestNode::file(Config::default());
        node.commit(&TransactionBuilder::new().put("a", doc(1)).build());
        let path = node.path().unwrap().to_path_buf();
        assert!(path.join(chronodb_core::LOG_FILE).exists());
        assert!(path.join(chronodb_core::DOCUMENTS_FILE).exists());
    }
}
