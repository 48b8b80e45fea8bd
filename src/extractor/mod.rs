// 异步解码节点编排：环形队列、节点接口、共享状态机、轨道读取、容器嗅探

pub mod node;
pub mod ring_queue;
pub mod shared;
pub mod sniff;
pub mod source;

#[cfg(test)]
pub mod mock_node;

pub use node::{BufferId, DecodeNode, NodeEvent, NodeObserver};
pub use ring_queue::RingQueue;
pub use shared::{SharedExtractor, State};
pub use source::{Extractor, MediaBuffer, ReadOptions, TrackSource};
