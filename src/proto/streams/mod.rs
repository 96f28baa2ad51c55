mod counts;
mod flow;
mod recv;
mod send;
mod state;
mod store;
mod stream;
mod tree;

pub(crate) use self::counts::Counts;
pub(crate) use self::flow::FlowControl;
pub(crate) use self::recv::Recv;
pub(crate) use self::send::{Send, SendData};
pub(crate) use self::state::State;
pub(crate) use self::store::Store;
pub(crate) use self::stream::{Chunk, ChunkItem, ContentLength, Stream};
pub(crate) use self::tree::{PriorityTree, DEFAULT_WEIGHT};

pub use self::stream::StreamStats;
