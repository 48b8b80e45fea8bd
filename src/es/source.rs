use log::{debug, info, warn};

use crate::core::error::{DemuxError, Result};
use crate::core::meta::MetaData;
use crate::core::types::{AccessUnit, DiscontinuityType, Lane, StreamType};
use crate::es::listener::{ListenerRead, StreamListener};
use crate::es::parser::EsParser;

/// 帧头：4 字节 ASCII 标签 + 4 字节 LE 帧长 + 8 字节时间戳
const HEADER_SIZE: usize = 16;
const TAG_AUDIO: &[u8; 4] = b"nesa";
const TAG_VIDEO: &[u8; 4] = b"nesv";
/// 帧长上限，超过视为头部损坏
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const STARTING_BUFFER_SIZE: usize = 8192;
/// 无标签模式的定长读取块（TS 包对齐）
const UNTAGGED_CHUNK: usize = 188 * 20;
/// 单次 pump 的迭代上限
const PUMP_ITERATIONS: usize = 10;

/// 字节流的喂入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// 每帧带 16 字节头（标签 + 长度 + 时间戳）
    Tagged,
    /// 无帧头，定长块、零时间戳、固定编码
    Untagged(StreamType),
}

/// 从非阻塞字节源取数据、重组帧、喂给解析器的泵。
///
/// 头部与帧体都可能被 WouldBlock 打断，进度保存在字段里跨 pump 续读。
pub struct EsStreamSource {
    listener: Box<dyn StreamListener>,
    parser: EsParser,
    mode: FeedMode,

    header: [u8; HEADER_SIZE],
    /// 头部已读字节数
    amount_read: usize,
    /// 帧体暂存区，按需增长
    frame: Vec<u8>,
    frame_len: usize,
    frame_read: usize,
    /// 当前帧的流类型与原始时间戳
    current: Option<(StreamType, i64)>,
    blocked_header: bool,
    blocked_frame: bool,

    final_result: Option<DemuxError>,
}

impl EsStreamSource {
    pub fn new(listener: Box<dyn StreamListener>, mode: FeedMode) -> Self {
        Self {
            listener,
            parser: EsParser::new(),
            mode,
            header: [0; HEADER_SIZE],
            amount_read: 0,
            frame: vec![0; STARTING_BUFFER_SIZE],
            frame_len: 0,
            frame_read: 0,
            current: None,
            blocked_header: false,
            blocked_frame: false,
            final_result: None,
        }
    }

    /// 驱动一轮读取，最多 PUMP_ITERATIONS 次迭代。
    /// 流已终结时直接复述终结结果。
    pub fn pump(&mut self) -> Result<()> {
        if let Some(err) = &self.final_result {
            return Err(err.replicate());
        }
        for _ in 0..PUMP_ITERATIONS {
            let progressed = match self.mode {
                FeedMode::Tagged => self.pump_tagged_once(),
                FeedMode::Untagged(st) => self.pump_untagged_once(st),
            };
            if !progressed {
                break;
            }
        }
        match &self.final_result {
            Some(err) => Err(err.replicate()),
            None => Ok(()),
        }
    }

    pub fn dequeue_access_unit(&mut self, lane: Lane) -> Result<AccessUnit> {
        match self.parser.source(lane) {
            Some(source) => source.dequeue_access_unit(),
            None => match &self.final_result {
                Some(err) => Err(err.replicate()),
                None => Err(DemuxError::WouldBlock),
            },
        }
    }

    pub fn format(&self, lane: Lane) -> Option<MetaData> {
        self.parser.format(lane)
    }

    /// 返回 false 表示本轮无法继续（WouldBlock / EOS）
    fn pump_tagged_once(&mut self) -> bool {
        // 头部累积
        while self.current.is_none() {
            if self.amount_read < HEADER_SIZE {
                match self
                    .listener
                    .read(&mut self.header[self.amount_read..HEADER_SIZE])
                {
                    ListenerRead::Data(n) => {
                        if self.blocked_header {
                            debug!("头部续读完成 {} 字节", n);
                            self.blocked_header = false;
                        }
                        self.amount_read += n;
                        continue;
                    }
                    ListenerRead::WouldBlock => {
                        self.blocked_header = true;
                        return false;
                    }
                    ListenerRead::Discontinuity { format_change } => {
                        self.handle_discontinuity(format_change);
                        continue;
                    }
                    ListenerRead::EndOfStream => {
                        self.handle_eos();
                        return false;
                    }
                }
            }

            // 头部齐了，解析
            self.amount_read = 0;
            let tag = &self.header[0..4];
            let stream_type = if tag == TAG_VIDEO {
                StreamType::H264
            } else if tag == TAG_AUDIO {
                StreamType::AacAdts
            } else {
                // 未知标签：丢弃该头部，下一帧从新头部重新开始
                warn!("未知帧标签 {:02x?}，丢弃该头部", tag);
                return true;
            };
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&self.header[4..8]);
            let frame_len = u32::from_le_bytes(len_bytes) as usize;
            if frame_len == 0 || frame_len > MAX_FRAME_SIZE {
                warn!("帧长非法 {}，丢弃该头部", frame_len);
                return true;
            }
            let mut ts_bytes = [0u8; 8];
            ts_bytes.copy_from_slice(&self.header[8..16]);
            let pts_us = u64::from_le_bytes(ts_bytes) as i64;

            self.frame_len = frame_len;
            self.frame_read = 0;
            if self.frame.len() < frame_len {
                debug!("帧暂存区扩容到 {} 字节", frame_len);
                self.frame.resize(frame_len, 0);
            }
            self.current = Some((stream_type, pts_us));
        }

        // 帧体累积
        let (stream_type, pts_us) = match self.current {
            Some(c) => c,
            None => return true,
        };
        while self.frame_read < self.frame_len {
            match self
                .listener
                .read(&mut self.frame[self.frame_read..self.frame_len])
            {
                ListenerRead::Data(n) => {
                    if self.blocked_frame {
                        debug!("帧体续读完成 {} 字节", n);
                        self.blocked_frame = false;
                    }
                    self.frame_read += n;
                }
                ListenerRead::WouldBlock => {
                    self.blocked_frame = true;
                    return false;
                }
                ListenerRead::Discontinuity { format_change } => {
                    // 帧中途的不连续点：当前半帧作废
                    warn!("帧体中途不连续点，丢弃半帧 ({} / {} 字节)", self.frame_read, self.frame_len);
                    self.reset_frame();
                    self.handle_discontinuity(format_change);
                    return true;
                }
                ListenerRead::EndOfStream => {
                    self.handle_eos();
                    return false;
                }
            }
        }

        // 整帧就绪
        let frame_len = self.frame_len;
        self.parser
            .feed_packet(stream_type, &self.frame[..frame_len], pts_us);
        self.reset_frame();
        true
    }

    fn pump_untagged_once(&mut self, stream_type: StreamType) -> bool {
        if self.frame.len() < UNTAGGED_CHUNK {
            self.frame.resize(UNTAGGED_CHUNK, 0);
        }
        match self.listener.read(&mut self.frame[..UNTAGGED_CHUNK]) {
            ListenerRead::Data(n) => {
                if n > 0 {
                    self.parser.feed_packet(stream_type, &self.frame[..n], 0);
                }
                true
            }
            ListenerRead::WouldBlock => false,
            ListenerRead::Discontinuity { format_change } => {
                self.handle_discontinuity(format_change);
                true
            }
            ListenerRead::EndOfStream => {
                self.handle_eos();
                false
            }
        }
    }

    fn reset_frame(&mut self) {
        self.current = None;
        self.frame_len = 0;
        self.frame_read = 0;
        self.amount_read = 0;
    }

    fn handle_discontinuity(&mut self, format_change: bool) {
        let ty = if format_change {
            DiscontinuityType::FormatChange
        } else {
            DiscontinuityType::Seek
        };
        self.parser.signal_discontinuity(ty);
    }

    fn handle_eos(&mut self) {
        if self.final_result.is_none() {
            info!("字节源结束，双轨道进入 EOS");
            self.final_result = Some(DemuxError::EndOfStream);
            self.parser.signal_eos(&DemuxError::EndOfStream);
        }
    }
}
