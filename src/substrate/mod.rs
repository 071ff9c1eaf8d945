// Substrate: in-process pub/sub plumbing the stages run on.
// Named channels, one callback per message per subscriber, periodic timers,
// and the multi-threaded executor that dispatches all of them.

pub mod channel;
pub mod executor;
pub mod message;

pub use channel::{Channel, Port, Publisher};
pub use executor::{Executor, ExecutorBuilder, ExecutorHandle, ExecutorReport, Node, NodeId, NodeReport};
pub use message::Message;
