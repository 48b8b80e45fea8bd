use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("参数无效: {0}")]
    InvalidArgument(String),

    #[error("内存不足（队列已满或分配失败）")]
    NoMemory,

    #[error("未找到（队列为空）")]
    NotFound,

    #[error("暂无数据，请稍后重试")]
    WouldBlock,

    #[error("流已结束")]
    EndOfStream,

    #[error("头部损坏: {0}")]
    BadHeader(String),

    #[error("等待超时: {0}")]
    Timeout(String),

    #[error("解码节点错误: {0:#x}")]
    NodeError(u32),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl DemuxError {
    /// 复制一份等价的错误值。
    /// 终结状态（EOS / 节点错误）需要对每次后续调用重复上报，
    /// 而 IoError / AnyhowError 不可 Clone，所以退化为 Other。
    pub fn replicate(&self) -> DemuxError {
        match self {
            DemuxError::IoError(e) => DemuxError::Other(format!("IO 错误: {}", e)),
            DemuxError::InvalidArgument(s) => DemuxError::InvalidArgument(s.clone()),
            DemuxError::NoMemory => DemuxError::NoMemory,
            DemuxError::NotFound => DemuxError::NotFound,
            DemuxError::WouldBlock => DemuxError::WouldBlock,
            DemuxError::EndOfStream => DemuxError::EndOfStream,
            DemuxError::BadHeader(s) => DemuxError::BadHeader(s.clone()),
            DemuxError::Timeout(s) => DemuxError::Timeout(s.clone()),
            DemuxError::NodeError(c) => DemuxError::NodeError(*c),
            DemuxError::Other(s) => DemuxError::Other(s.clone()),
            DemuxError::AnyhowError(e) => DemuxError::Other(format!("{}", e)),
        }
    }

    /// 是否为「稍后重试」而非真正的失败
    pub fn is_would_block(&self) -> bool {
        matches!(self, DemuxError::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, DemuxError>;
