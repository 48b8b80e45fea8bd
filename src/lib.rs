//! 解复用与缓冲编排核心库
//!
//! 两个独立的半边：
//! - `es`：基本流（Elementary Stream）侧。从非阻塞字节源读取帧化数据，
//!   按编解码器重组为完整访问单元（Access Unit），每条轨道一个下游队列。
//! - `extractor`：异步解码节点侧。通过命令/事件协议驱动外部解码节点，
//!   用有界环形队列管理空/满缓冲区，提供 start/read/stop 的轨道读取接口。

pub mod core;
pub mod es;
pub mod extractor;

pub use crate::core::error::{DemuxError, Result};
pub use crate::core::types::{AccessUnit, DiscontinuityType, Lane, StreamType, TrackInfo};
