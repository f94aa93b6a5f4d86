//! Dispatch resolution pipeline.
//!
//! Handlers opt in by declaring an event in the [`PolicyRegistry`]. After a
//! handler succeeds, [`dispatch_middleware`] passes its response payload to
//! the [`DispatchResolver`], which resolves the guard, target channels and
//! excluded socket id, then makes a single transport call.

mod channel;
mod context;
mod event;
mod guard;
mod layer;
mod registry;
mod resolver;
mod socket;

pub use channel::{ChannelBuilder, ChannelError, ChannelPolicy, Channels};
pub use context::{RequestContext, ResponseContext};
pub use event::{EventDescriptor, HandlerId};
pub use guard::{evaluate_guard, GuardError, GuardPolicy};
pub use layer::dispatch_middleware;
pub use registry::{
    HandlerDeclaration, HandlerPolicies, MetadataStore, PolicyRegistry, PolicyRegistryBuilder,
    RegistryError,
};
pub use resolver::{
    DispatchOutcome, DispatchResolver, DispatchStats, DispatchStatsSnapshot, DispatchTuple,
    SkipReason,
};
pub use socket::{resolve_socket_id, SocketIdError, SocketIdPolicy, DEFAULT_SOCKET_ID_HEADER};
