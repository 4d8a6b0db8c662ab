//! The knowledge base façade.
//!
//! A cheap-to-clone value type combining one shared [`KnowledgeContext`]
//! with the compiled-expression cache and an optional transport. Cloning a
//! knowledge base shares the context — every handle observes the same
//! mutations — and the context itself is never duplicated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::context::{ContextGuard, KnowledgeContext, KnowledgeSnapshot, KnowledgeState, WriteOutcome};
use crate::error::{KarlError, KarlResult};
use crate::functions::KarlFunction;
use crate::lang::CompiledExpression;
use crate::record::{KnowledgeRecord, KnowledgeValue};
use crate::settings::{EvalSettings, UpdateSettings, WaitSettings};
use crate::transport::{ChannelHub, ChannelTransport, KnowledgeUpdate, Transport};

struct KnowledgeBaseInner {
    id: String,
    context: Arc<KnowledgeContext>,
    cache: Mutex<HashMap<String, Arc<CompiledExpression>>>,
}

/// A handle on one knowledge context.
#[derive(Clone)]
pub struct KnowledgeBase {
    inner: Arc<KnowledgeBaseInner>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBase {
    /// A fresh knowledge base with a generated originator identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(format!("karl-{}", Uuid::new_v4()))
    }

    /// A fresh knowledge base with an explicit originator identity.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(KnowledgeBaseInner {
                id: id.into(),
                context: Arc::new(KnowledgeContext::new()),
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The originator identity stamped on outbound updates.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> Arc<KnowledgeContext> {
        Arc::clone(&self.inner.context)
    }

    /// Locks the context for a multi-operation atomic section.
    pub fn lock(&self) -> KarlResult<ContextGuard<'_>> {
        self.inner.context.lock()
    }

    /// Compiles source text, reusing the cached tree for repeated text.
    pub fn compile(&self, source: &str) -> KarlResult<Arc<CompiledExpression>> {
        let mut cache = self
            .inner
            .cache
            .lock()
            .map_err(|_| KarlError::internal("poisoned expression cache"))?;
        if let Some(compiled) = cache.get(source) {
            return Ok(Arc::clone(compiled));
        }
        let compiled = Arc::new(CompiledExpression::compile(source)?);
        cache.insert(source.to_string(), Arc::clone(&compiled));
        debug!(source, "compiled and cached expression");
        Ok(compiled)
    }

    /// Evaluates source text with default settings.
    pub fn evaluate(&self, source: &str) -> KarlResult<KnowledgeRecord> {
        self.evaluate_with(source, &EvalSettings::default())
    }

    /// Evaluates source text.
    pub fn evaluate_with(
        &self,
        source: &str,
        settings: &EvalSettings,
    ) -> KarlResult<KnowledgeRecord> {
        let compiled = self.compile(source)?;
        self.inner.context.evaluate(&compiled, settings)
    }

    /// Evaluates an already-compiled expression.
    pub fn evaluate_compiled(
        &self,
        compiled: &CompiledExpression,
        settings: &EvalSettings,
    ) -> KarlResult<KnowledgeRecord> {
        self.inner.context.evaluate(compiled, settings)
    }

    /// Blocks until the expression is true, shutdown, or timeout; the
    /// returned record's truthiness tells which (timeout is not an error).
    pub fn wait(&self, source: &str, settings: &WaitSettings) -> KarlResult<KnowledgeRecord> {
        let compiled = self.compile(source)?;
        self.inner.context.wait(&compiled, settings)
    }

    /// Waits on an already-compiled expression.
    pub fn wait_compiled(
        &self,
        compiled: &CompiledExpression,
        settings: &WaitSettings,
    ) -> KarlResult<KnowledgeRecord> {
        self.inner.context.wait(compiled, settings)
    }

    /// Reads a key's record (deep copy).
    pub fn get(&self, key: &str) -> KarlResult<KnowledgeRecord> {
        self.inner.context.get(key)
    }

    /// Writes a key with default update settings.
    pub fn set(&self, key: &str, value: impl Into<KnowledgeValue>) -> KarlResult<WriteOutcome> {
        self.inner.context.set(key, value, &UpdateSettings::default())
    }

    /// Writes a key.
    pub fn set_with(
        &self,
        key: &str,
        value: impl Into<KnowledgeValue>,
        settings: &UpdateSettings,
    ) -> KarlResult<WriteOutcome> {
        self.inner.context.set(key, value, settings)
    }

    /// Pins the write quality for a key.
    pub fn set_quality(&self, key: &str, quality: u32) -> KarlResult<()> {
        self.inner.context.set_quality(key, quality)
    }

    /// Binds a native function.
    pub fn define_function<F>(&self, name: impl Into<String>, function: F) -> KarlResult<()>
    where
        F: Fn(&[KnowledgeRecord], &mut KnowledgeState) -> KarlResult<KnowledgeRecord>
            + Send
            + Sync
            + 'static,
    {
        self.inner
            .context
            .define_function(name, KarlFunction::native(function))
    }

    /// Binds a function whose body is a KaRL expression.
    pub fn define_karl_function(
        &self,
        name: impl Into<String>,
        source: &str,
    ) -> KarlResult<()> {
        self.inner
            .context
            .define_function(name, KarlFunction::expression(source)?)
    }

    /// Attaches a transport; subsequent evaluations hand their modified
    /// sets to it.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) -> KarlResult<()> {
        self.inner.context.set_transport(Some(transport))
    }

    /// Connects this knowledge base to an in-process fabric under its own
    /// identity and attaches the resulting transport.
    pub fn connect(&self, hub: &ChannelHub) -> KarlResult<Arc<ChannelTransport>> {
        let transport = hub.connect(self.inner.id.clone(), self.context())?;
        self.attach_transport(Arc::clone(&transport) as Arc<dyn Transport>)?;
        Ok(transport)
    }

    /// Applies one inbound update, dropping self-originated traffic.
    pub fn receive(&self, update: &KnowledgeUpdate) -> KarlResult<()> {
        if update.originator == self.inner.id {
            return Ok(());
        }
        self.inner.context.receive(update)
    }

    /// Flushes modifications queued by `delay_sending_modifieds`.
    pub fn send_modifieds(&self) -> KarlResult<usize> {
        self.inner.context.send_modifieds()
    }

    /// Snapshot of the whole map, for persistence collaborators.
    pub fn export_map(&self) -> KarlResult<KnowledgeSnapshot> {
        self.inner.context.export_map()
    }

    /// Restores a snapshot; without `force`, entries merge through
    /// conflict resolution so a restore never regresses newer knowledge.
    pub fn import_map(&self, snapshot: KnowledgeSnapshot, force: bool) -> KarlResult<()> {
        self.inner.context.import_map(snapshot, force)
    }

    /// All keys sharing a prefix.
    pub fn to_map(&self, prefix: &str) -> KarlResult<KnowledgeSnapshot> {
        self.inner.context.to_map(prefix)
    }

    /// Requests cooperative shutdown: wakes every waiter, then detaches
    /// the transport, joining its worker thread before returning.
    pub fn shutdown(&self) -> KarlResult<()> {
        self.inner.context.shutdown()?;
        self.inner.context.set_transport(None)
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}
