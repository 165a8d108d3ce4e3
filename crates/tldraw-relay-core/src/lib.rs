//! Core types for tldraw-relay: the operation model, the in-process
//! operation bus, the snapshot correlator, the event-stream frame codec,
//! configuration and errors.

pub mod bus;
pub mod config;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod operation;

pub use bus::{OperationBus, Subscription, SubscriptionHandle};
pub use correlator::{SnapshotCorrelator, SnapshotOutcome};
pub use frame::{Frame, FrameDecoder};
pub use operation::Operation;
