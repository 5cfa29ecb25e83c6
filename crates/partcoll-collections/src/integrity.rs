//! Chain integrity checker for linked queues.
//!
//! Compares the nodes reachable from `HEAD` with the nodes actually stored and
//! reports anything the two disagree on. The check only reads; it never repairs.

use std::collections::{HashMap, HashSet};
use std::fmt;

use partcoll_kv::LockOwner;
use tracing::{debug, warn};

use crate::codec::Element;
use crate::collection::DistributedCollection;
use crate::error::Result;
use crate::node::NodeKey;
use crate::queue::{LinkedQueue, Slot};

/// Severity level for an integrity finding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntegritySeverity {
    /// The chain is broken; elements are lost or unreachable for polls.
    Error,
    /// Storage is wasted but every reachable element is intact.
    Warning,
}

impl fmt::Display for IntegritySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegritySeverity::Error => write!(f, "ERROR"),
            IntegritySeverity::Warning => write!(f, "WARNING"),
        }
    }
}

/// Kinds of chain inconsistency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Exactly one of `HEAD` and `TAIL` is set.
    SlotMismatch {
        /// Stored head pointer
        head: Option<NodeKey>,
        /// Stored tail pointer
        tail: Option<NodeKey>,
    },
    /// `HEAD` names a node that is not stored.
    DanglingHead {
        /// The missing node
        head: NodeKey,
    },
    /// A node's `next` names a node that is not stored.
    DanglingNext {
        /// Node holding the reference
        from: NodeKey,
        /// The missing node
        to: NodeKey,
    },
    /// Following `next` revisits a node.
    Cycle {
        /// First node seen twice
        at: NodeKey,
    },
    /// `TAIL` is not the last node reachable from `HEAD`.
    TailMismatch {
        /// Last reachable node
        expected: Option<NodeKey>,
        /// Stored tail pointer
        actual: Option<NodeKey>,
    },
    /// A stored node no walk from `HEAD` reaches.
    OrphanNode {
        /// The unreachable node
        node: NodeKey,
    },
}

impl IntegrityIssue {
    /// Severity this issue is reported with.
    pub fn severity(&self) -> IntegritySeverity {
        match self {
            IntegrityIssue::OrphanNode { .. } => IntegritySeverity::Warning,
            _ => IntegritySeverity::Error,
        }
    }
}

fn opt(key: &Option<NodeKey>) -> String {
    key.map(|k| k.to_string()).unwrap_or_else(|| "none".to_string())
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::SlotMismatch { head, tail } => {
                write!(f, "HEAD is {} but TAIL is {}", opt(head), opt(tail))
            }
            IntegrityIssue::DanglingHead { head } => write!(f, "HEAD points to missing {}", head),
            IntegrityIssue::DanglingNext { from, to } => {
                write!(f, "{} links to missing {}", from, to)
            }
            IntegrityIssue::Cycle { at } => write!(f, "chain loops back to {}", at),
            IntegrityIssue::TailMismatch { expected, actual } => write!(
                f,
                "TAIL is {} but the chain ends at {}",
                opt(actual),
                opt(expected)
            ),
            IntegrityIssue::OrphanNode { node } => write!(f, "orphan {}", node),
        }
    }
}

/// A single finding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityFinding {
    /// Severity of the finding
    pub severity: IntegritySeverity,
    /// The detected issue
    pub issue: IntegrityIssue,
}

impl fmt::Display for IntegrityFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.issue)
    }
}

/// Result of an integrity check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Every finding, in discovery order
    pub findings: Vec<IntegrityFinding>,
    /// Nodes reachable from `HEAD`
    pub reachable: usize,
    /// Nodes stored
    pub stored: usize,
    /// Error-severity findings
    pub errors: u64,
    /// Warning-severity findings
    pub warnings: u64,
}

impl IntegrityReport {
    /// True if no errors were found.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }

    fn push(&mut self, issue: IntegrityIssue) {
        let severity = issue.severity();
        match severity {
            IntegritySeverity::Error => self.errors += 1,
            IntegritySeverity::Warning => self.warnings += 1,
        }
        self.findings.push(IntegrityFinding { severity, issue });
    }
}

/// Pure checker over a snapshot of the slots and the `next` links.
pub(crate) struct ChainChecker {
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
    links: HashMap<NodeKey, Option<NodeKey>>,
}

impl ChainChecker {
    pub(crate) fn new(head: Option<NodeKey>, tail: Option<NodeKey>) -> Self {
        Self {
            head,
            tail,
            links: HashMap::new(),
        }
    }

    pub(crate) fn add_node(&mut self, key: NodeKey, next: Option<NodeKey>) {
        self.links.insert(key, next);
    }

    pub(crate) fn check(&self) -> IntegrityReport {
        let mut report = IntegrityReport {
            stored: self.links.len(),
            ..IntegrityReport::default()
        };

        if self.head.is_some() != self.tail.is_some() {
            report.push(IntegrityIssue::SlotMismatch {
                head: self.head,
                tail: self.tail,
            });
        }

        let mut visited = HashSet::new();
        let mut last = None;
        let mut cursor = self.head;
        let mut intact = true;
        while let Some(key) = cursor {
            if !visited.insert(key) {
                report.push(IntegrityIssue::Cycle { at: key });
                intact = false;
                break;
            }
            let Some(next) = self.links.get(&key) else {
                visited.remove(&key);
                report.push(match last {
                    None => IntegrityIssue::DanglingHead { head: key },
                    Some(from) => IntegrityIssue::DanglingNext { from, to: key },
                });
                intact = false;
                break;
            };
            last = Some(key);
            cursor = *next;
        }
        report.reachable = visited.len();

        if intact && self.head.is_some() && self.tail != last {
            report.push(IntegrityIssue::TailMismatch {
                expected: last,
                actual: self.tail,
            });
        }

        let mut orphans: Vec<NodeKey> = self
            .links
            .keys()
            .filter(|k| !visited.contains(*k))
            .copied()
            .collect();
        orphans.sort();
        for node in orphans {
            report.push(IntegrityIssue::OrphanNode { node });
        }

        report
    }
}

impl<E: Element> LinkedQueue<E> {
    /// Checks the chain against the stored nodes.
    ///
    /// `HEAD` and `TAIL` are held for the duration, so offers and polls wait;
    /// iterator removals of interior nodes can still race with the walk.
    pub async fn check_integrity(&self) -> Result<IntegrityReport> {
        let owner = LockOwner::new();
        let timeout = self.config().lock_timeout();
        let head_lock = self.lock_slot(Slot::Head, owner, timeout).await?;
        let tail_lock = self.lock_slot(Slot::Tail, owner, timeout).await?;

        let mut checker = ChainChecker::new(
            self.read_slot(Slot::Head).await?,
            self.read_slot(Slot::Tail).await?,
        );
        // node locks are not taken: an iterator holds node locks while it waits on TAIL
        let mut cursor = self.nodes().scan().await?;
        while let Some((key, node)) = cursor.next().await? {
            checker.add_node(key, node.next);
        }

        tail_lock.release().await?;
        head_lock.release().await?;

        let report = checker.check();
        if report.findings.is_empty() {
            debug!(queue = self.name(), nodes = report.stored, "integrity check clean");
        } else {
            for finding in &report.findings {
                warn!(queue = self.name(), "{}", finding);
            }
        }
        Ok(report)
    }
}
