// 基本流侧：字节源监听、编解码重组、轨道队列、解析器、帧化泵

pub mod es_queue;
pub mod listener;
pub mod packet_queue;
pub mod parser;
pub mod source;

pub use es_queue::ElementaryStreamQueue;
pub use listener::{channel_listener, ChannelStreamListener, ListenerRead, StreamFeeder, StreamListener};
pub use packet_queue::PacketQueue;
pub use parser::EsParser;
pub use source::{EsStreamSource, FeedMode};
