//! Strictly sequential chains of async steps
//!
//! Each step borrows the context mutably for the duration of its future, so
//! two steps can never overlap. A step may carry a skip predicate evaluated
//! just before it would run. The first failing step aborts the chain.
//!
//! ```rust,ignore
//! let chain = WorkChain::new()
//!     .then("pdu mode", |s: &mut Session| Box::pin(async move { s.set_pdu_mode().await }))
//!     .then_unless("storage", |s| s.storage.is_none(), |s| Box::pin(async move { s.select().await }));
//! chain.run(&mut session).await?;
//! ```

use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::error::Result;

type Step<C> = Box<dyn for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<()>> + Send>;
type Skip<C> = Box<dyn Fn(&C) -> bool + Send>;

struct Entry<C> {
    label: String,
    skip: Option<Skip<C>>,
    step: Step<C>,
}

/// An ordered list of async steps over a context `C`
pub struct WorkChain<C> {
    entries: Vec<Entry<C>>,
}

impl<C> Default for WorkChain<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> WorkChain<C> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a step
    pub fn then<F>(mut self, label: impl Into<String>, step: F) -> Self
    where
        F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<()>> + Send + 'static,
    {
        self.entries.push(Entry {
            label: label.into(),
            skip: None,
            step: Box::new(step),
        });
        self
    }

    /// Append a step that is skipped when `skip` holds at run time
    pub fn then_unless<P, F>(mut self, label: impl Into<String>, skip: P, step: F) -> Self
    where
        P: Fn(&C) -> bool + Send + 'static,
        F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<()>> + Send + 'static,
    {
        self.entries.push(Entry {
            label: label.into(),
            skip: Some(Box::new(skip)),
            step: Box::new(step),
        });
        self
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain has no steps
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every step in order; returns how many ran (skips excluded)
    pub async fn run(self, ctx: &mut C) -> Result<usize> {
        let mut ran = 0;
        for entry in self.entries {
            if entry.skip.as_ref().is_some_and(|skip| skip(ctx)) {
                trace!(step = %entry.label, "skipped");
                continue;
            }
            trace!(step = %entry.label, "running");
            if let Err(e) = (entry.step)(ctx).await {
                debug!(step = %entry.label, error = %e, "work chain aborted");
                return Err(e);
            }
            ran += 1;
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModemError;

    #[derive(Default)]
    struct Log {
        entries: Vec<&'static str>,
        skip_second: bool,
    }

    impl Log {
        async fn record(&mut self, entry: &'static str) -> Result<()> {
            tokio::task::yield_now().await;
            self.entries.push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let mut log = Log::default();
        let ran = WorkChain::new()
            .then("a", |l: &mut Log| Box::pin(l.record("a")))
            .then("b", |l: &mut Log| Box::pin(l.record("b")))
            .then("c", |l: &mut Log| Box::pin(l.record("c")))
            .run(&mut log)
            .await
            .unwrap();
        assert_eq!(ran, 3);
        assert_eq!(log.entries, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining() {
        let mut log = Log::default();
        let err = WorkChain::new()
            .then("a", |l: &mut Log| Box::pin(l.record("a")))
            .then("fail", |_: &mut Log| {
                Box::pin(async { Err(ModemError::Timeout { duration_ms: 1 }) })
            })
            .then("c", |l: &mut Log| Box::pin(l.record("c")))
            .run(&mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, ModemError::Timeout { .. }));
        assert_eq!(log.entries, vec!["a"]);
    }

    #[tokio::test]
    async fn test_skip_predicate_checked_at_run_time() {
        let mut log = Log::default();
        let chain = WorkChain::new()
            .then("flag", |l: &mut Log| {
                Box::pin(async move {
                    l.skip_second = true;
                    Ok(())
                })
            })
            .then_unless(
                "second",
                |l: &Log| l.skip_second,
                |l: &mut Log| Box::pin(l.record("second")),
            )
            .then("third", |l: &mut Log| Box::pin(l.record("third")));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.run(&mut log).await.unwrap(), 2);
        assert_eq!(log.entries, vec!["third"]);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain: WorkChain<Log> = WorkChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.run(&mut Log::default()).await.unwrap(), 0);
    }
}
