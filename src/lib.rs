//! # karl-kb — replicated shared-knowledge middleware
//!
//! A process holds a local key/value knowledge map and mutates it through
//! KaRL, an embedded expression language. Updates merge across processes
//! with per-key Lamport clocks and write-quality scores: conflict
//! resolution is deterministic and commutative, so any delivery order of
//! remote updates converges to the same map.
//!
//! ## Core Concepts
//!
//! - **Knowledge Record**: a tagged value cell carrying clock and quality
//! - **KaRL**: the expression language for reading, mutating, and
//!   synchronizing over the map
//! - **Knowledge Context**: the mutex-guarded map plus wait/signal
//!   machinery
//! - **Knowledge Base**: the façade combining context, expression cache,
//!   and an optional transport
//!
//! ## Usage
//!
//! ```rust
//! use karl_kb::KnowledgeBase;
//!
//! let kb = KnowledgeBase::new();
//! kb.evaluate(".var1 = 8; .var2 = 3; .var3 = .var1 + .var2")?;
//! assert_eq!(kb.get(".var3")?.as_integer(), 11);
//! # Ok::<(), karl_kb::KarlError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Thread-safe knowledge context.
pub mod context;
/// Error taxonomy.
pub mod error;
/// Function registry.
pub mod functions;
/// Knowledge base façade.
pub mod knowledge_base;
/// The KaRL language: lexer, parser, tree, evaluation.
pub mod lang;
/// Knowledge records and value semantics.
pub mod record;
/// Update, evaluation, and wait settings.
pub mod settings;
/// Transport boundary and the in-process fabric.
pub mod transport;

pub use context::{ContextGuard, KnowledgeContext, KnowledgeSnapshot, KnowledgeState, WriteOutcome};
pub use error::{CompileError, EvalError, KarlError, KarlResult, TransportError};
pub use functions::{FunctionRegistry, KarlFunction};
pub use knowledge_base::KnowledgeBase;
pub use lang::CompiledExpression;
pub use record::{KnowledgeRecord, KnowledgeValue};
pub use settings::{EvalSettings, UpdateSettings, WaitSettings};
pub use transport::{
    ChannelHub, ChannelHubConfig, ChannelTransport, KnowledgeUpdate, Transport, UpdateKind,
};
