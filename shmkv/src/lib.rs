//! # shmkv: Shared Memory Key/Value Buffers
//!
//! Lets independent processes of one application exchange byte buffers by
//! name without a broker. Each buffer lives in its own SysV shared memory
//! segment, identified by a number derived from the application key and
//! a purpose string, and guarded by a POSIX named semaphore of the same
//! identifier.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐  purpose key  ┌──────────────┐
//! │   Host      ├──────────────►│    Store     │
//! │ init/write/ │               │              │
//! │ read/free   │◄──────────────┤ registry     │  identifier = hash(purpose) + app key
//! └─────────────┘     bytes     │ gate table   │
//!                               └──────┬───────┘
//!                                      │ acquire gate, attach
//!                               ┌──────▼───────────────────────┐
//!                               │ SysV segment                 │
//!                               │ [magic|ver|pid|fp|ts|len|..] │
//!                               └──────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shmkv::{Store, ShmError};
//!
//! # fn main() -> Result<(), ShmError> {
//! let mut store = Store::new(42u32);
//! store.write("greeting", b"hello")?;
//! assert_eq!(store.read("greeting")?, b"hello");
//! store.free_all()?;
//!
//! match store.read("greeting") {
//!     Err(ShmError::NotFound { purpose_key }) => println!("{purpose_key} is gone"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Exact payloads**: the header records the payload length, so zero
//!   bytes inside a buffer survive a round trip.
//! - **Exclusion**: every write, read, stat and free holds the segment's
//!   gate for its whole duration.
//! - **Bounded waits**: gate acquisition times out with `GateTimeout`
//!   (5 s by default) instead of hanging on a crashed holder.
//! - **Alias detection**: identifiers are 32 bits and can collide; the
//!   header fingerprint turns a collision into `KeyCollision` rather than
//!   silently sharing a buffer.
//!
//! ## Known Limitations
//!
//! - Single host only.
//! - A process that crashes while holding a gate leaves it taken until
//!   the semaphore is unlinked.
//! - Segments persist after all processes exit until freed or reboot.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod host;
pub mod key;
pub mod namespace;
pub mod platform;
pub mod registry;
pub mod segment;
pub mod store;

pub use config::{ShmKvConfig, StoreConfig};
pub use error::{FreeFailure, ShmError, ShmResult};
pub use fallback::FallbackStore;
pub use gate::{Gate, GateGuard, GateTable};
pub use host::Host;
pub use key::{ApplicationKey, SegmentId, derive, fingerprint};
pub use namespace::Namespace;
pub use registry::{AttachedSegment, SegmentRegistry};
pub use segment::{ParsedHeader, SegmentHeader};
pub use store::{SegmentInfo, Store};

use common::config::LogLevel;

/// Initialize tracing from `RUST_LOG`
pub fn init_tracing() {
    init_tracing_with_level(LogLevel::default());
}

/// Initialize tracing from `RUST_LOG`, falling back to `level`
pub fn init_tracing_with_level(level: LogLevel) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    // A subscriber may already be installed by the host
    let _ = tracing::subscriber::set_global_default(subscriber);
}
