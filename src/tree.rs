//! The node tree: an arena of nodes keyed by absolute path.
//!
//! Parents own the names of their children; nodes never hold references to
//! each other or to sessions, only ids and paths. The tree knows nothing of
//! locking or watches. The processor wraps every mutation in its critical
//! section and turns the returned [`Change`]s into watch firings.

use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

use crate::config::LimitsConfig;
use crate::error::{CoordError, Result};
use crate::op::{Op, OpCode, OpResult};
use crate::path::{self, ROOT};
use crate::session::SessionId;
use crate::store::{CreateMode, Stat, ANY_VERSION};

/// A single transaction: one zxid and one timestamp shared by every
/// mutation it applies.
#[derive(Debug, Clone, Copy)]
pub struct Txn {
    pub zxid: u64,
    pub time: SystemTime,
}

/// A structural change applied to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created {
        path: String,
        parent: String,
        ephemeral_owner: Option<SessionId>,
    },
    DataChanged {
        path: String,
    },
    Deleted {
        path: String,
        parent: String,
        ephemeral_owner: Option<SessionId>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    czxid: u64,
    mzxid: u64,
    pzxid: u64,
    ctime: SystemTime,
    mtime: SystemTime,
    version: i64,
    cversion: i64,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
}

impl Node {
    fn new(data: Vec<u8>, ephemeral_owner: Option<SessionId>, txn: &Txn) -> Self {
        Self {
            data,
            czxid: txn.zxid,
            mzxid: txn.zxid,
            pzxid: txn.zxid,
            ctime: txn.time,
            mtime: txn.time,
            version: 0,
            cversion: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            czxid: self.czxid,
            mzxid: self.mzxid,
            pzxid: self.pzxid,
            ctime: self.ctime,
            mtime: self.mtime,
            version: self.version,
            cversion: self.cversion,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len(),
            num_children: self.children.len(),
        }
    }
}

fn check_version(op: OpCode, path: &str, expected: i64, found: i64) -> Result<()> {
    if expected != ANY_VERSION && expected != found {
        return Err(CoordError::VersionMismatch {
            op,
            path: path.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

fn no_node(op: OpCode, path: &str) -> CoordError {
    CoordError::NoNode {
        op,
        path: path.to_string(),
    }
}

fn internal(op: OpCode, path: &str, detail: impl Into<String>) -> CoordError {
    CoordError::Internal {
        op,
        path: path.to_string(),
        detail: detail.into(),
    }
}

/// Original state of every path a batch touched, for rollback.
#[derive(Debug, Default)]
struct Undo {
    saved: Vec<(String, Option<Node>)>,
}

impl Undo {
    fn save(&mut self, nodes: &HashMap<String, Node>, path: &str) {
        if self.saved.iter().any(|(p, _)| p == path) {
            return;
        }
        self.saved.push((path.to_string(), nodes.get(path).cloned()));
    }
}

/// Hierarchical namespace of versioned nodes.
#[derive(Debug)]
pub struct NodeTree {
    nodes: HashMap<String, Node>,
    last_zxid: u64,
    limits: LimitsConfig,
}

impl NodeTree {
    /// Create a tree holding only the root.
    pub fn new(limits: LimitsConfig) -> Self {
        let genesis = Txn {
            zxid: 0,
            time: SystemTime::now(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_string(), Node::new(Vec::new(), None, &genesis));
        Self {
            nodes,
            last_zxid: 0,
            limits,
        }
    }

    /// Start a transaction. Nothing is consumed until [`commit`](Self::commit).
    pub fn begin(&self) -> Txn {
        Txn {
            zxid: self.last_zxid + 1,
            time: SystemTime::now(),
        }
    }

    /// Record a transaction as applied.
    pub fn commit(&mut self, txn: &Txn) {
        self.last_zxid = self.last_zxid.max(txn.zxid);
    }

    /// Zxid of the last committed transaction.
    pub fn last_zxid(&self) -> u64 {
        self.last_zxid
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn validate(&self, path: &str, op: OpCode) -> Result<()> {
        path::validate_path(path, self.limits.max_path_length, op)
    }

    fn check_data(&self, path: &str, data: &[u8], op: OpCode) -> Result<()> {
        if data.len() > self.limits.max_data_bytes {
            return Err(CoordError::DataTooLarge {
                op,
                path: path.to_string(),
                size: data.len(),
                limit: self.limits.max_data_bytes,
            });
        }
        Ok(())
    }

    /// Create a node.
    ///
    /// Returns the created path (with the sequence suffix for sequential
    /// modes) and its stat. Ephemeral modes require an owner.
    pub fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
        owner: Option<SessionId>,
        txn: &Txn,
    ) -> Result<(String, Stat, Change)> {
        let op = OpCode::Create;
        // Sequential names are validated with the suffix in place.
        let candidate = if mode.is_sequential() {
            sequential_name(path, 0)
        } else {
            path.to_string()
        };
        self.validate(&candidate, op)?;
        if candidate == ROOT {
            return Err(CoordError::NodeExists {
                op,
                path: path.to_string(),
            });
        }
        self.check_data(path, &data, op)?;

        let ephemeral_owner = if mode.is_ephemeral() {
            Some(owner.ok_or_else(|| internal(op, path, "ephemeral create without owner"))?)
        } else {
            None
        };

        let parent_path = path::parent(&candidate)
            .ok_or_else(|| internal(op, path, "non-root path without parent"))?
            .to_string();
        let parent = self.nodes.get(&parent_path).ok_or_else(|| CoordError::NoParent {
            op,
            path: path.to_string(),
        })?;
        if parent.ephemeral_owner.is_some() {
            return Err(CoordError::NoChildrenForEphemerals {
                op,
                path: path.to_string(),
            });
        }

        let actual = if mode.is_sequential() {
            let actual = sequential_name(path, parent.cversion);
            self.validate(&actual, op)?;
            actual
        } else {
            candidate
        };
        if self.nodes.contains_key(&actual) {
            return Err(CoordError::NodeExists { op, path: actual });
        }
        let name = path::name(&actual).to_string();

        let node = Node::new(data, ephemeral_owner, txn);
        let stat = node.stat();
        self.nodes.insert(actual.clone(), node);

        let parent = self
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| internal(op, path, "parent vanished during create"))?;
        parent.children.insert(name);
        parent.cversion += 1;
        parent.pzxid = txn.zxid;

        let change = Change::Created {
            path: actual.clone(),
            parent: parent_path,
            ephemeral_owner,
        };
        Ok((actual, stat, change))
    }

    /// Read a node's data and stat.
    pub fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let op = OpCode::GetData;
        self.validate(path, op)?;
        let node = self.nodes.get(path).ok_or_else(|| no_node(op, path))?;
        Ok((node.data.clone(), node.stat()))
    }

    /// Overwrite a node's data.
    pub fn set(
        &mut self,
        path: &str,
        data: Vec<u8>,
        expected_version: i64,
        txn: &Txn,
    ) -> Result<(Stat, Change)> {
        let op = OpCode::SetData;
        self.validate(path, op)?;
        self.check_data(path, &data, op)?;
        let node = self.nodes.get_mut(path).ok_or_else(|| no_node(op, path))?;
        check_version(op, path, expected_version, node.version)?;

        node.data = data;
        node.version += 1;
        node.mzxid = txn.zxid;
        node.mtime = txn.time;

        let change = Change::DataChanged {
            path: path.to_string(),
        };
        Ok((node.stat(), change))
    }

    /// Delete a childless node.
    pub fn delete(&mut self, path: &str, expected_version: i64, txn: &Txn) -> Result<Change> {
        let op = OpCode::Delete;
        self.validate(path, op)?;
        if path == ROOT {
            return Err(CoordError::InvalidPath {
                op,
                path: path.to_string(),
                reason: "root cannot be deleted".to_string(),
            });
        }
        let node = self.nodes.get(path).ok_or_else(|| no_node(op, path))?;
        check_version(op, path, expected_version, node.version)?;
        if !node.children.is_empty() {
            return Err(CoordError::NotEmpty {
                op,
                path: path.to_string(),
            });
        }
        let ephemeral_owner = node.ephemeral_owner;

        let parent_path = path::parent(path)
            .ok_or_else(|| internal(op, path, "non-root path without parent"))?
            .to_string();
        let name = path::name(path);
        // Verify the back-reference before touching anything.
        let parent = self
            .nodes
            .get_mut(&parent_path)
            .ok_or_else(|| internal(op, path, "parent missing"))?;
        if !parent.children.remove(name) {
            return Err(internal(op, path, "parent does not list node as child"));
        }
        parent.cversion += 1;
        parent.pzxid = txn.zxid;
        self.nodes.remove(path);

        Ok(Change::Deleted {
            path: path.to_string(),
            parent: parent_path,
            ephemeral_owner,
        })
    }

    /// Verify a node's data version without changing anything.
    pub fn check(&self, path: &str, expected_version: i64) -> Result<()> {
        let op = OpCode::Check;
        self.validate(path, op)?;
        let node = self.nodes.get(path).ok_or_else(|| no_node(op, path))?;
        check_version(op, path, expected_version, node.version)
    }

    /// Sorted child names and the node's stat.
    pub fn children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        let op = OpCode::GetChildren;
        self.validate(path, op)?;
        let node = self.nodes.get(path).ok_or_else(|| no_node(op, path))?;
        Ok((node.children.iter().cloned().collect(), node.stat()))
    }

    /// Stat a node if present.
    pub fn stat(&self, path: &str) -> Option<Stat> {
        self.nodes.get(path).map(Node::stat)
    }

    /// Check if a node exists. Never fails.
    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Apply a batch all-or-nothing under one transaction.
    ///
    /// On failure every touched node is restored and the error names the
    /// index of the failing operation.
    pub fn multi(
        &mut self,
        ops: Vec<Op>,
        owner: Option<SessionId>,
        txn: &Txn,
    ) -> Result<(Vec<OpResult>, Vec<Change>)> {
        let mut undo = Undo::default();
        let mut results = Vec::with_capacity(ops.len());
        let mut changes = Vec::new();

        for (index, op) in ops.into_iter().enumerate() {
            match self.apply_one(op, owner, txn, &mut undo) {
                Ok((result, change)) => {
                    results.push(result);
                    changes.extend(change);
                }
                Err(source) => {
                    self.rollback(undo);
                    return Err(CoordError::MultiFailed {
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok((results, changes))
    }

    fn apply_one(
        &mut self,
        op: Op,
        owner: Option<SessionId>,
        txn: &Txn,
        undo: &mut Undo,
    ) -> Result<(OpResult, Option<Change>)> {
        match op {
            Op::Create { path, data, mode } => {
                // Sequential names depend on the parent, so save both the
                // parent and the name the parent will hand out.
                let candidate = if mode.is_sequential() {
                    sequential_name(&path, 0)
                } else {
                    path.clone()
                };
                if let Some(parent) = path::parent(&candidate) {
                    undo.save(&self.nodes, parent);
                    let actual = match (mode.is_sequential(), self.nodes.get(parent)) {
                        (true, Some(p)) => sequential_name(&path, p.cversion),
                        _ => path.clone(),
                    };
                    undo.save(&self.nodes, &actual);
                }
                let (actual, _, change) = self.create(&path, data, mode, owner, txn)?;
                Ok((OpResult::Create { path: actual }, Some(change)))
            }
            Op::SetData {
                path,
                data,
                version,
            } => {
                undo.save(&self.nodes, &path);
                let (stat, change) = self.set(&path, data, version, txn)?;
                Ok((OpResult::SetData { stat }, Some(change)))
            }
            Op::Delete { path, version } => {
                undo.save(&self.nodes, &path);
                if let Some(parent) = path::parent(&path) {
                    undo.save(&self.nodes, parent);
                }
                let change = self.delete(&path, version, txn)?;
                Ok((OpResult::Delete, Some(change)))
            }
            Op::Check { path, version } => {
                self.check(&path, version)?;
                Ok((OpResult::Check, None))
            }
        }
    }

    fn rollback(&mut self, undo: Undo) {
        for (path, original) in undo.saved.into_iter().rev() {
            match original {
                Some(node) => {
                    self.nodes.insert(path, node);
                }
                None => {
                    self.nodes.remove(&path);
                }
            }
        }
    }
}

/// Requested path with a zero-padded sequence number appended.
fn sequential_name(path: &str, seq: i64) -> String {
    format!("{}{:010}", path, seq)
}
