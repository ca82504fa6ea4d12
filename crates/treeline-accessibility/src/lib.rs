//! Accessibility-tree inspection engine: oracle abstraction, canonical
//! encoding, forest capture, node queries and debounced event aggregation.
//! Network-facing code lives in the server crate.

pub mod aggregator;
pub mod encode;
pub mod events;
pub mod oracle;
pub mod query;
pub mod tree;

pub use aggregator::{
    ScrollTracker, StabilityTracker, TextTracker, DEFAULT_SCROLL_DEBOUNCE,
    DEFAULT_STABILITY_QUIESCENCE, DEFAULT_TEXT_INACTIVITY,
};
pub use encode::{EncoderConfig, NodeMetadata, NodeRecord};
pub use events::{RawUiEvent, RawUiEventKind, SessionEvent, SourceNode};
pub use oracle::{
    Bounds, CollectionInfo, CollectionItemInfo, GestureKind, GestureRequest, LaunchRequest,
    LaunchType, NodeAction, NodeIndex, NullOracle, StaticOracle, TreeOracle, UiNode, UiWindow,
};
pub use query::{FoundNode, PropMap, PropValue, Query};
pub use tree::{CaptureFilter, ChromePolicy, KeepAllWindows, Snapshot, TreeWalker, WindowRecord, WindowPolicy};
