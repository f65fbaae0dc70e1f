//! Filesystem watching and event bridging
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   notify    │────>│ ChangeSource │────>│ EventBridge │──> Hub broadcast
//! │   watcher   │     │ (classify,   │     │ (resolve    │    on the root's
//! └─────────────┘     │  filter)     │     │  owning     │    channel
//!                     └──────────────┘     │  root)      │
//!                                          └─────────────┘
//! ```

pub mod bridge;
pub mod source;

pub use bridge::{resolve_root, EventBridge};
pub use source::{
    ChangeKind, ChangeSource, FsChangeEvent, WatchRoot, DEFAULT_IGNORE_PATTERNS,
};
