//! The thread-safe knowledge context.
//!
//! One [`KnowledgeState`] — variable map, Lamport clock, quality table,
//! modified sets, function registry — lives behind a single mutex inside
//! [`KnowledgeContext`]. Evaluation takes `&mut KnowledgeState`, so the
//! "exclusive access while evaluating" rule is enforced by the borrow
//! checker rather than by a recursive-lock convention. A condition variable
//! provides wake-on-change for threads blocked in [`KnowledgeContext::wait`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::{EvalError, KarlError, KarlResult};
use crate::functions::{FunctionRegistry, KarlFunction};
use crate::lang::eval::evaluate_node;
use crate::lang::CompiledExpression;
use crate::record::{KnowledgeRecord, KnowledgeValue};
use crate::settings::{EvalSettings, UpdateSettings, WaitSettings};
use crate::transport::{encode_assignments, split_assignments, KnowledgeUpdate, Transport, UpdateKind};

/// Outcome of a write into the knowledge map.
///
/// Rejections are routine under concurrent writers, so they are status
/// values rather than errors. `code` mirrors the conventional integer
/// codes of knowledge middlewares (1 updated, 0 unchanged, -2 quality too
/// low, -3 stale clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was written.
    Applied,
    /// The update was acceptable but carried no new value.
    Unchanged,
    /// Rejected: the write's quality lost the arbitration.
    LowQuality,
    /// Rejected: the update's clock is behind the stored record.
    StaleClock,
}

impl WriteOutcome {
    /// True if the map now reflects the update's value.
    #[must_use]
    pub const fn accepted(self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }

    /// The conventional integer status code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Applied => 1,
            Self::Unchanged => 0,
            Self::LowQuality => -2,
            Self::StaleClock => -3,
        }
    }
}

/// A full-map snapshot, used by the snapshot/restore primitive.
pub type KnowledgeSnapshot = BTreeMap<String, KnowledgeRecord>;

fn validate_key(key: &str) -> KarlResult<()> {
    if key.is_empty()
        || key
            .chars()
            .any(|c| c.is_whitespace() || c == ';' || c == '=' || c == '\'' || c == '"')
    {
        return Err(EvalError::InvalidKey {
            key: key.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Everything the context owns, mutated only under its lock.
#[derive(Default)]
pub struct KnowledgeState {
    map: HashMap<String, KnowledgeRecord>,
    clock: u64,
    quality: HashMap<String, u32>,
    modified: BTreeSet<String>,
    local_modified: BTreeSet<String>,
    functions: FunctionRegistry,
    transport: Option<Arc<dyn Transport>>,
    shutdown: bool,
}

impl std::fmt::Debug for KnowledgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeState")
            .field("variables", &self.map.len())
            .field("clock", &self.clock)
            .field("modified", &self.modified.len())
            .field("functions", &self.functions.len())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl KnowledgeState {
    /// Deep copy of a key's record; uncreated if the key was never written.
    #[must_use]
    pub fn get(&self, key: &str) -> KnowledgeRecord {
        self.map
            .get(key)
            .cloned()
            .unwrap_or_else(KnowledgeRecord::uncreated)
    }

    /// Current Lamport clock.
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// The write quality used for local writes to `key` (default 0).
    #[must_use]
    pub fn quality(&self, key: &str) -> u32 {
        self.quality.get(key).copied().unwrap_or(0)
    }

    /// Pins the write quality for a key.
    pub fn set_quality(&mut self, key: impl Into<String>, quality: u32) {
        self.quality.insert(key.into(), quality);
    }

    /// True once shutdown was requested.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Resolves a function binding.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<KarlFunction> {
        self.functions.get(name)
    }

    /// Binds a function name (last-writer-wins).
    pub fn define_function(&mut self, name: impl Into<String>, function: KarlFunction) {
        self.functions.define(name, function);
    }

    /// Applies a local write.
    ///
    /// The write is stamped with a fresh clock (`clock + clock_increment`)
    /// and the key's pinned write quality. Unless `always_overwrite` is
    /// set, a record whose stored quality exceeds the key's write quality
    /// rejects the write. Global keys enter the modified set unless
    /// `treat_globals_as_locals`; local (`.`-prefixed) keys enter the local
    /// set only when `track_local_changes`.
    pub fn apply_update(
        &mut self,
        key: &str,
        value: KnowledgeValue,
        settings: &UpdateSettings,
    ) -> KarlResult<WriteOutcome> {
        validate_key(key)?;
        let write_quality = self.quality(key);
        if !settings.always_overwrite {
            if let Some(current) = self.map.get(key) {
                if write_quality < current.quality {
                    trace!(key, write_quality, current = current.quality, "write lost quality arbitration");
                    return Ok(WriteOutcome::LowQuality);
                }
            }
        }
        self.clock = self.clock.wrapping_add(settings.clock_increment);
        let record = KnowledgeRecord::with_meta(value, self.clock, write_quality);
        self.map.insert(key.to_string(), record);

        if key.starts_with('.') {
            if settings.track_local_changes {
                self.local_modified.insert(key.to_string());
            }
        } else if !settings.treat_globals_as_locals {
            self.modified.insert(key.to_string());
        }
        Ok(WriteOutcome::Applied)
    }

    /// Merges a record under the clock/quality rule, without the local-key
    /// guard. Shared by remote deliveries and snapshot imports.
    fn merge_record(&mut self, key: &str, incoming: KnowledgeRecord) -> WriteOutcome {
        let outcome = match self.map.get(key) {
            None => WriteOutcome::Applied,
            Some(current) => {
                if incoming.clock > current.clock {
                    WriteOutcome::Applied
                } else if incoming.clock < current.clock {
                    WriteOutcome::StaleClock
                } else if incoming.quality > current.quality {
                    WriteOutcome::Applied
                } else if incoming.quality < current.quality {
                    WriteOutcome::LowQuality
                } else if incoming.value == current.value {
                    WriteOutcome::Unchanged
                } else if incoming.value.compare(&current.value) == std::cmp::Ordering::Greater {
                    // Full tie on clock and quality: break deterministically
                    // on the value ordering so merges commute.
                    WriteOutcome::Applied
                } else {
                    WriteOutcome::LowQuality
                }
            }
        };
        if outcome == WriteOutcome::Applied {
            self.clock = self.clock.max(incoming.clock);
            self.map.insert(key.to_string(), incoming);
        }
        outcome
    }

    /// Conflict-resolution entry point for one inbound remote assignment.
    ///
    /// Accepts iff the incoming clock is ahead, or equal with a quality at
    /// least as high (full ties break on the value ordering). Rejections
    /// leave the map untouched and are reported as status, not errors.
    /// Local keys are never subject to remote resolution.
    pub fn apply_remote(
        &mut self,
        key: &str,
        incoming: KnowledgeRecord,
    ) -> KarlResult<WriteOutcome> {
        validate_key(key)?;
        if key.starts_with('.') {
            return Err(EvalError::InvalidKey {
                key: key.to_string(),
            }
            .into());
        }
        let outcome = self.merge_record(key, incoming);
        match outcome {
            WriteOutcome::Applied => trace!(key, "accepted remote update"),
            WriteOutcome::Unchanged => {}
            WriteOutcome::LowQuality | WriteOutcome::StaleClock => {
                // Rejected updates are discarded without touching state.
                debug!(key, outcome = outcome.code(), "discarded remote update");
            }
        }
        Ok(outcome)
    }

    /// Removes a key outright; the only transition back to uncreated.
    pub fn delete(&mut self, key: &str) -> bool {
        self.modified.remove(key);
        self.local_modified.remove(key);
        self.map.remove(key).is_some()
    }

    /// Keys modified since the last send/clear, in order.
    #[must_use]
    pub fn modified_keys(&self) -> Vec<String> {
        self.modified.iter().cloned().collect()
    }

    /// Locally tracked `.`-prefixed modifications (see
    /// [`UpdateSettings::track_local_changes`]).
    #[must_use]
    pub fn local_modified_keys(&self) -> Vec<String> {
        self.local_modified.iter().cloned().collect()
    }

    /// Clears both modified sets without sending.
    pub fn clear_modifieds(&mut self) {
        self.modified.clear();
        self.local_modified.clear();
    }

    /// Stamps every pending modification with one shared clock value,
    /// hands the batch to the attached transport, and clears the set.
    pub fn send_modifieds(&mut self) -> KarlResult<usize> {
        if self.modified.is_empty() {
            return Ok(0);
        }
        let stamp = self.clock;
        let mut batch: Vec<(String, KnowledgeRecord)> = Vec::with_capacity(self.modified.len());
        for key in &self.modified {
            if let Some(record) = self.map.get_mut(key) {
                record.clock = stamp;
                batch.push((key.clone(), record.clone()));
            }
        }
        self.modified.clear();

        let count = batch.len();
        if let Some(transport) = self.transport.clone() {
            debug!(count, clock = stamp, "sending modified knowledge");
            // Binary payloads have no batch encoding, so their presence
            // downgrades the batch to per-key sends.
            let has_binary = batch
                .iter()
                .any(|(_, r)| matches!(r.value, KnowledgeValue::Binary(_)));
            if batch.len() == 1 || has_binary {
                for (key, record) in &batch {
                    transport.send(key, record)?;
                }
            } else {
                let quality = batch.iter().map(|(_, r)| r.quality).max().unwrap_or(0);
                let encoded = encode_assignments(&batch);
                transport.send_multi(&encoded, stamp, quality)?;
            }
        }
        Ok(count)
    }

    /// Snapshot of the whole map.
    #[must_use]
    pub fn export_map(&self) -> KnowledgeSnapshot {
        self.map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Restores a snapshot. When `force`, records are installed verbatim;
    /// otherwise each entry goes through the merge rule, so a restore
    /// never regresses newer knowledge.
    pub fn import_map(&mut self, snapshot: KnowledgeSnapshot, force: bool) -> KarlResult<()> {
        for (key, record) in snapshot {
            validate_key(&key)?;
            if force {
                self.clock = self.clock.max(record.clock);
                self.map.insert(key, record);
            } else {
                self.merge_record(&key, record);
            }
        }
        Ok(())
    }

    /// All keys sharing a prefix, with their records.
    #[must_use]
    pub fn to_map(&self, prefix: &str) -> KnowledgeSnapshot {
        self.map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Expands `{key}` references in a print statement against the map.
    #[must_use]
    pub fn expand_statement(&self, statement: &str) -> String {
        let mut out = String::with_capacity(statement.len());
        let mut rest = statement;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let Some(close) = rest[open..].find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let key = &rest[open + 1..open + close];
            out.push_str(&self.get(key).to_string());
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// A guard over the context's state for multi-operation atomic sections.
pub struct ContextGuard<'a> {
    state: MutexGuard<'a, KnowledgeState>,
}

impl std::ops::Deref for ContextGuard<'_> {
    type Target = KnowledgeState;

    fn deref(&self) -> &KnowledgeState {
        &self.state
    }
}

impl std::ops::DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut KnowledgeState {
        &mut self.state
    }
}

/// The mutex-guarded knowledge state plus its wait/signal machinery.
///
/// Any number of façade handles share one context through an `Arc`; the
/// context itself is never duplicated.
#[derive(Debug, Default)]
pub struct KnowledgeContext {
    inner: Mutex<KnowledgeState>,
    changed: Condvar,
}

impl KnowledgeContext {
    /// An empty context with clock 0 and no transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> KarlResult<MutexGuard<'_, KnowledgeState>> {
        self.inner
            .lock()
            .map_err(|_| KarlError::internal("poisoned context lock"))
    }

    /// Locks the state for an external multi-operation atomic section.
    pub fn lock(&self) -> KarlResult<ContextGuard<'_>> {
        Ok(ContextGuard {
            state: self.lock_state()?,
        })
    }

    /// Deep copy of a key's record. Never blocks on anything but the lock.
    pub fn get(&self, key: &str) -> KarlResult<KnowledgeRecord> {
        Ok(self.lock_state()?.get(key))
    }

    /// Applies a local write, waking waiters when `signal_changes`.
    pub fn set(
        &self,
        key: &str,
        value: impl Into<KnowledgeValue>,
        settings: &UpdateSettings,
    ) -> KarlResult<WriteOutcome> {
        let outcome = self.lock_state()?.apply_update(key, value.into(), settings)?;
        if outcome == WriteOutcome::Applied && settings.signal_changes {
            self.changed.notify_all();
        }
        Ok(outcome)
    }

    /// Pins the write quality for a key.
    pub fn set_quality(&self, key: &str, quality: u32) -> KarlResult<()> {
        self.lock_state()?.set_quality(key, quality);
        Ok(())
    }

    /// Conflict-resolution entry point for remote deliveries; always wakes
    /// waiters on an accepted value, since the sender cannot.
    pub fn apply_remote(&self, key: &str, incoming: KnowledgeRecord) -> KarlResult<WriteOutcome> {
        let outcome = self.lock_state()?.apply_remote(key, incoming)?;
        if outcome == WriteOutcome::Applied {
            self.changed.notify_all();
        }
        Ok(outcome)
    }

    /// Binds a function name.
    pub fn define_function(
        &self,
        name: impl Into<String>,
        function: KarlFunction,
    ) -> KarlResult<()> {
        self.lock_state()?.define_function(name, function);
        Ok(())
    }

    /// Attaches (or detaches) the transport collaborator used by
    /// `send_modifieds`.
    pub fn set_transport(&self, transport: Option<Arc<dyn Transport>>) -> KarlResult<()> {
        let previous = {
            let mut state = self.lock_state()?;
            std::mem::replace(&mut state.transport, transport)
        };
        // Dropping a transport may join its worker thread, which in turn
        // may be blocked on this context's lock; release first.
        drop(previous);
        Ok(())
    }

    /// Evaluates a compiled expression under the lock.
    ///
    /// Modified keys are stamped with one shared clock value and handed to
    /// the transport (unless `delay_sending_modifieds`), then the modified
    /// set is cleared.
    pub fn evaluate(
        &self,
        compiled: &CompiledExpression,
        settings: &EvalSettings,
    ) -> KarlResult<KnowledgeRecord> {
        let mut state = self.lock_state()?;
        let result = Self::evaluate_locked(&mut state, compiled, settings);
        drop(state);
        if settings.update.signal_changes {
            self.changed.notify_all();
        }
        result
    }

    fn evaluate_locked(
        state: &mut KnowledgeState,
        compiled: &CompiledExpression,
        settings: &EvalSettings,
    ) -> KarlResult<KnowledgeRecord> {
        if let Some(statement) = &settings.pre_print_statement {
            tracing::info!(target: "karl_kb::eval", "{}", state.expand_statement(statement));
        }
        trace!(source = compiled.source(), "evaluating");
        let result = evaluate_node(compiled.root(), state, settings)?;
        if !settings.delay_sending_modifieds {
            state.send_modifieds()?;
        }
        if let Some(statement) = &settings.post_print_statement {
            tracing::info!(target: "karl_kb::eval", "{}", state.expand_statement(statement));
        }
        Ok(result)
    }

    /// Evaluates until the expression is true, shutdown is requested, or
    /// the time budget runs out.
    ///
    /// While false, the calling thread blocks on the condition variable for
    /// at most `poll_frequency` per round and re-checks even without a wake
    /// signal, since remote threads may change state without signalling.
    /// Timing out is not an error: the last (still false) record is
    /// returned and the caller inspects its truthiness.
    pub fn wait(
        &self,
        compiled: &CompiledExpression,
        settings: &WaitSettings,
    ) -> KarlResult<KnowledgeRecord> {
        let deadline = settings.max_wait_time.map(|budget| Instant::now() + budget);
        let mut state = self.lock_state()?;
        loop {
            let result = Self::evaluate_locked(&mut state, compiled, &settings.eval)?;
            if settings.eval.update.signal_changes {
                self.changed.notify_all();
            }
            if result.is_true() || state.is_shutdown() {
                return Ok(result);
            }
            let now = Instant::now();
            let mut timeout = settings.poll_frequency;
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return Ok(result);
                }
                timeout = timeout.min(deadline.saturating_duration_since(now));
            }
            let (reacquired, _) = self
                .changed
                .wait_timeout(state, timeout)
                .map_err(|_| KarlError::internal("poisoned context lock"))?;
            state = reacquired;
        }
    }

    /// Applies one inbound transport message.
    ///
    /// Every contained assignment goes through conflict resolution; a
    /// rejected or invalid pair is discarded (logged at debug) without
    /// disturbing the rest of the batch or local state.
    pub fn receive(&self, update: &KnowledgeUpdate) -> KarlResult<()> {
        match update.kind {
            UpdateKind::Assignment => {
                let record = KnowledgeRecord::with_meta(
                    update.value.clone(),
                    update.clock,
                    update.quality,
                );
                if let Err(err) = self.apply_remote(&update.key, record) {
                    debug!(key = %update.key, %err, "discarded invalid remote assignment");
                }
                Ok(())
            }
            UpdateKind::MultipleAssignment => {
                let KnowledgeValue::String(payload) = &update.value else {
                    return Err(crate::error::TransportError::MalformedPayload {
                        message: "multiple assignment payload must be a string".to_string(),
                    }
                    .into());
                };
                for (key, value) in split_assignments(payload)? {
                    let record = KnowledgeRecord::with_meta(value, update.clock, update.quality);
                    if let Err(err) = self.apply_remote(&key, record) {
                        debug!(key = %key, %err, "discarded invalid remote assignment");
                    }
                }
                Ok(())
            }
        }
    }

    /// Flushes modifications queued by `delay_sending_modifieds`.
    pub fn send_modifieds(&self) -> KarlResult<usize> {
        self.lock_state()?.send_modifieds()
    }

    /// Current Lamport clock.
    pub fn clock(&self) -> KarlResult<u64> {
        Ok(self.lock_state()?.clock())
    }

    /// Snapshot of the whole map.
    pub fn export_map(&self) -> KarlResult<KnowledgeSnapshot> {
        Ok(self.lock_state()?.export_map())
    }

    /// Restores a snapshot (see [`KnowledgeState::import_map`]).
    pub fn import_map(&self, snapshot: KnowledgeSnapshot, force: bool) -> KarlResult<()> {
        self.lock_state()?.import_map(snapshot, force)?;
        self.changed.notify_all();
        Ok(())
    }

    /// All keys sharing a prefix.
    pub fn to_map(&self, prefix: &str) -> KarlResult<KnowledgeSnapshot> {
        Ok(self.lock_state()?.to_map(prefix))
    }

    /// Requests cooperative shutdown: every blocked waiter wakes and
    /// returns its last-evaluated record.
    pub fn shutdown(&self) -> KarlResult<()> {
        self.lock_state()?.shutdown = true;
        self.changed.notify_all();
        Ok(())
    }
}
