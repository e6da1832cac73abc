//! In-memory subsystem.
//!
//! Namespaces only count their open channels, which is what teardown
//! checks need.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use pollgroup_core::{IoChannel, Namespace, Subsystem, SubsystemError};

pub struct MemSubsystem {
    nqn: String,
    namespaces: RwLock<Vec<Arc<MemNamespace>>>,
}

impl MemSubsystem {
    pub fn new(nqn: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            nqn: nqn.into(),
            namespaces: RwLock::new(Vec::new()),
        })
    }

    pub fn add_namespace(self: &Arc<Self>, nsid: u32) -> Arc<MemNamespace> {
        let ns = Arc::new(MemNamespace {
            nqn: self.nqn.clone(),
            nsid,
            open: Arc::new(AtomicUsize::new(0)),
            fail_open: AtomicBool::new(false),
        });
        self.namespaces.write().push(ns.clone());
        ns
    }

    /// Channels currently open across every namespace.
    pub fn open_channels(&self) -> usize {
        self.namespaces.read().iter().map(|ns| ns.open_channels()).sum()
    }
}

impl Subsystem for MemSubsystem {
    fn nqn(&self) -> &str {
        &self.nqn
    }

    fn namespaces(&self) -> Vec<Arc<dyn Namespace>> {
        self.namespaces
            .read()
            .iter()
            .map(|ns| ns.clone() as Arc<dyn Namespace>)
            .collect()
    }
}

pub struct MemNamespace {
    nqn: String,
    nsid: u32,
    open: Arc<AtomicUsize>,
    fail_open: AtomicBool,
}

impl MemNamespace {
    pub fn open_channels(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Make later `open_channel()` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

impl Namespace for MemNamespace {
    fn nsid(&self) -> u32 {
        self.nsid
    }

    fn open_channel(&self) -> Result<Box<dyn IoChannel>, SubsystemError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SubsystemError::ChannelOpen {
                nqn: self.nqn.clone(),
                nsid: self.nsid,
            });
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemChannel {
            nsid: self.nsid,
            open: self.open.clone(),
        }))
    }
}

struct MemChannel {
    nsid: u32,
    open: Arc<AtomicUsize>,
}

impl IoChannel for MemChannel {
    fn nsid(&self) -> u32 {
        self.nsid
    }

    fn close(self: Box<Self>) {}
}

impl Drop for MemChannel {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_counted() {
        let subsys = MemSubsystem::new("nqn.2016-06.io.spdk:cnode1");
        let ns1 = subsys.add_namespace(1);
        subsys.add_namespace(2);
        assert_eq!(subsys.namespaces().len(), 2);

        let a = ns1.open_channel().unwrap();
        let b = ns1.open_channel().unwrap();
        assert_eq!(a.nsid(), 1);
        assert_eq!(ns1.open_channels(), 2);
        a.close();
        assert_eq!(ns1.open_channels(), 1);
        drop(b);
        assert_eq!(subsys.open_channels(), 0);
    }

    #[test]
    fn test_injected_open_failure() {
        let subsys = MemSubsystem::new("nqn.test");
        let ns = subsys.add_namespace(7);
        ns.set_fail_open(true);
        let err = ns.open_channel().err();
        assert_eq!(
            err,
            Some(SubsystemError::ChannelOpen {
                nqn: "nqn.test".into(),
                nsid: 7
            })
        );
        assert_eq!(ns.open_channels(), 0);
    }
}
