use serde::{Deserialize, Serialize};

/// 轨道通道：视频或音频
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Video,
    Audio,
}

impl Lane {
    /// 对应解码节点的端口号（视频 0，音频 1）
    pub fn port(&self) -> u32 {
        match self {
            Lane::Video => 0,
            Lane::Audio => 1,
        }
    }

    /// 数组下标（与 port 相同，但类型为 usize）
    pub fn index(&self) -> usize {
        self.port() as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Video => "video",
            Lane::Audio => "audio",
        }
    }

    pub const ALL: [Lane; 2] = [Lane::Video, Lane::Audio];
}

/// 基本流编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// H.264 Annex-B 字节流
    H264,
    /// AAC，ADTS 帧化
    AacAdts,
}

impl StreamType {
    pub fn lane(&self) -> Lane {
        match self {
            StreamType::H264 => Lane::Video,
            StreamType::AacAdts => Lane::Audio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::H264 => "H264",
            StreamType::AacAdts => "AAC(ADTS)",
        }
    }
}

/// 不连续点类型
///
/// 同时承担两个语义：作为发生的「事件种类」，以及挂起合并时的「严重度」。
/// 合并规则只升不降，由显式的 severity() 决定，避免依赖枚举声明顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscontinuityType {
    /// 时间跳变（seek），格式不变
    Seek,
    /// 格式变更，当前格式作废
    FormatChange,
}

impl DiscontinuityType {
    pub fn severity(&self) -> u32 {
        match self {
            DiscontinuityType::Seek => 1,
            DiscontinuityType::FormatChange => 2,
        }
    }
}

/// 一个完整的访问单元（一帧视频 NAL 或一帧 ADTS 音频）
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    /// 归一化后的时间戳（微秒）
    pub pts_us: i64,
    /// 若该单元之前发生过不连续点，标记其类型
    pub discontinuity: Option<DiscontinuityType>,
}

impl AccessUnit {
    pub fn new(data: Vec<u8>, pts_us: i64) -> Self {
        Self {
            data,
            pts_us,
            discontinuity: None,
        }
    }
}

/// 缓冲区标志位
pub mod buffer_flags {
    /// 该缓冲区是此端口的最后一个（可能为零长度）
    pub const EOS: u32 = 0x1;
    /// 编解码器配置数据（如 SPS/PPS），不是媒体数据
    pub const CODEC_CONFIG: u32 = 0x80;
}

/// 轨道信息摘要（供上层展示 / 序列化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
    pub duration_us: i64,
}

impl Default for TrackInfo {
    fn default() -> Self {
        Self {
            mime: String::new(),
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
            bit_rate: 0,
            duration_us: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(
            DiscontinuityType::FormatChange.severity() > DiscontinuityType::Seek.severity()
        );
    }

    #[test]
    fn test_lane_ports() {
        assert_eq!(Lane::Video.port(), 0);
        assert_eq!(Lane::Audio.port(), 1);
        assert_eq!(StreamType::H264.lane(), Lane::Video);
        assert_eq!(StreamType::AacAdts.lane(), Lane::Audio);
    }

    #[test]
    fn test_track_info_json_round_trip() {
        let info = TrackInfo {
            mime: "video/avc".to_string(),
            width: 1280,
            height: 720,
            duration_us: 5_000_000,
            ..Default::default()
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: TrackInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mime, info.mime);
        assert_eq!(back.width, 1280);
        assert_eq!(back.duration_us, 5_000_000);
    }
}
