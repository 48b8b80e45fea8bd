use crate::core::error::Result;
use crate::core::types::StreamType;

/// 缓冲区标识：端口号 + 竞技场（arena）槽位下标
///
/// 节点分配的每个缓冲区用它寻址，归还 / 填充 / 释放都凭此标识，
/// 不依赖任何指针身份比较。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub port: u32,
    pub slot: usize,
}

/// 解码节点的宏观状态（事件中上报用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Loaded,
    Idle,
    Executing,
    Pause,
    Invalid,
}

/// 刷新范围：单端口或全部端口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    Port(u32),
    All,
}

/// 发往节点的异步命令。完成后由事件回执
pub enum NodeCommand {
    SetState(NodeState),
    PortDisable(u32),
    Flush(FlushScope),
}

/// 节点参数查询键
pub enum ParamKey {
    /// 端口定义：最小缓冲区数、缓冲区大小
    PortDefinition(u32),
    /// 端口上的基本流类型
    StreamType(u32),
    /// 媒体总时长
    Duration,
    /// 视频参数（宽 / 高）
    VideoParams,
    /// 音频参数（采样率 / 声道 / 码率）
    AudioParams,
}

/// 参数查询结果
pub enum ParamValue {
    PortDefinition {
        min_buffer_count: usize,
        buffer_size: usize,
    },
    StreamType(Option<StreamType>),
    DurationUs(i64),
    VideoParams {
        width: i32,
        height: i32,
    },
    AudioParams {
        sample_rate: i32,
        channels: i32,
        bit_rate: i32,
    },
}

/// 节点配置项
pub enum NodeConfig {
    /// 定位到指定时间（微秒）
    SeekPosition(i64),
}

/// 节点错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorCode {
    /// 端口缓冲区未就绪（拆除过程中的正常噪声）
    PortUnpopulated,
    /// 节点尚未就绪
    NotReady,
    /// 请求切换到当前已处于的状态
    SameState,
    /// 硬件 / 实现自定义错误
    Hardware(u32),
}

impl NodeErrorCode {
    /// 良性错误：记录日志后忽略，不进入错误状态
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            NodeErrorCode::PortUnpopulated | NodeErrorCode::NotReady | NodeErrorCode::SameState
        )
    }

    pub fn code(&self) -> u32 {
        match self {
            NodeErrorCode::PortUnpopulated => 0x8000_1014,
            NodeErrorCode::NotReady => 0x8000_1010,
            NodeErrorCode::SameState => 0x8000_1013,
            NodeErrorCode::Hardware(c) => *c,
        }
    }
}

/// 命令完成回执
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandComplete {
    StateReached(NodeState),
    Flushed(FlushScope),
    PortDisabled(u32),
}

/// 节点上报的事件
pub enum NodeEvent {
    CommandComplete(CommandComplete),
    /// 端口级标志：目前只有 EOS
    BufferFlag { port: u32, eos: bool },
    /// 一个缓冲区填充完毕
    FillBufferDone {
        id: BufferId,
        data: Vec<u8>,
        pts_us: i64,
        flags: u32,
    },
    Error { code: NodeErrorCode },
}

/// 事件接收者。节点从自己的线程上下文投递事件，
/// 绝不能在命令调用内同步回调（编排器发命令时持有自身的锁）。
pub trait NodeObserver: Send + Sync {
    fn on_event(&self, event: NodeEvent);
}

/// 异步解码节点接口
///
/// 命令异步执行、事件回执；缓冲区由节点分配、编排器持有 BufferId。
pub trait DecodeNode: Send + Sync {
    fn set_observer(&self, observer: std::sync::Arc<dyn NodeObserver>);

    fn send_command(&self, command: NodeCommand) -> Result<()>;

    fn get_parameter(&self, key: ParamKey) -> Result<ParamValue>;

    fn set_config(&self, config: NodeConfig) -> Result<()>;

    /// 端口的编解码器配置头（若有）
    fn codec_header(&self, port: u32) -> Result<Vec<u8>>;

    fn allocate_buffer(&self, port: u32, size: usize) -> Result<BufferId>;

    fn free_buffer(&self, id: BufferId) -> Result<()>;

    /// 请求节点填充该缓冲区；完成后以 FillBufferDone 事件回执
    fn fill_buffer(&self, id: BufferId) -> Result<()>;
}
