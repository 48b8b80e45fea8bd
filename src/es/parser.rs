use std::sync::Arc;

use log::{debug, info};

use crate::core::error::{DemuxError, Result};
use crate::core::meta::MetaData;
use crate::core::types::{DiscontinuityType, Lane, StreamType};
use crate::es::es_queue::ElementaryStreamQueue;
use crate::es::packet_queue::PacketQueue;

struct LaneState {
    queue: Option<ElementaryStreamQueue>,
    source: Option<Arc<PacketQueue>>,
    first_pts_valid: bool,
    first_pts_us: i64,
    /// 下游队列创建前积累的不连续点（只升不降）
    pending_discontinuity: Option<DiscontinuityType>,
}

impl LaneState {
    fn new() -> Self {
        Self {
            queue: None,
            source: None,
            first_pts_valid: false,
            first_pts_us: 0,
            pending_discontinuity: None,
        }
    }
}

/// 基本流解析器：按流类型路由到对应轨道，归一化时间戳，
/// 在格式确定后惰性创建下游队列。
pub struct EsParser {
    lanes: [LaneState; 2],
}

impl EsParser {
    pub fn new() -> Self {
        Self {
            lanes: [LaneState::new(), LaneState::new()],
        }
    }

    /// 喂入一个已帧化的负载。时间戳为原始值，内部归一化。
    pub fn feed_packet(&mut self, stream_type: StreamType, payload: &[u8], pts_us: i64) {
        let idx = stream_type.lane().index();
        if self.lanes[idx].queue.is_none() {
            info!("初始化 {} 轨道（{}）", stream_type.lane().as_str(), stream_type.as_str());
            self.lanes[idx].queue = Some(ElementaryStreamQueue::new(stream_type));
        }
        let ts = self.convert_pts(idx, pts_us);
        if let Some(queue) = self.lanes[idx].queue.as_mut() {
            queue.append(payload, ts);
        }
        self.drain_lane(idx);
    }

    /// 时间戳归一化。
    /// 0 是「尚无时间戳」的哨兵：原样传递，不参与基准建立；
    /// 首个非零 PTS 成为基准并映射到 0，早于基准的值钳制到 0。
    /// 这意味着真实的 0 时间戳无法与「无时间戳」区分——保留既有行为。
    fn convert_pts(&mut self, idx: usize, pts_us: i64) -> i64 {
        if pts_us == 0 {
            return 0;
        }
        let lane = &mut self.lanes[idx];
        if !lane.first_pts_valid {
            lane.first_pts_valid = true;
            lane.first_pts_us = pts_us;
        }
        if pts_us < lane.first_pts_us {
            0
        } else {
            pts_us - lane.first_pts_us
        }
    }

    /// 把 ES 队列里已完整的访问单元搬到下游队列。
    /// 下游队列在格式确定后才创建，创建时先冲掉挂起的不连续点。
    fn drain_lane(&mut self, idx: usize) {
        loop {
            let unit = match self.lanes[idx].queue.as_mut() {
                Some(q) => match q.dequeue_access_unit() {
                    Some(u) => u,
                    None => break,
                },
                None => break,
            };

            if self.lanes[idx].source.is_none() {
                let format = self.lanes[idx]
                    .queue
                    .as_ref()
                    .and_then(|q| q.format());
                match format {
                    Some(format) => {
                        let source = Arc::new(PacketQueue::new(Some(format)));
                        if let Some(ty) = self.lanes[idx].pending_discontinuity.take() {
                            source.queue_discontinuity(ty);
                        }
                        self.lanes[idx].source = Some(source);
                    }
                    None => {
                        // 格式未知，该单元无处安放
                        debug!("轨道 {} 格式未定，丢弃 {} 字节单元", idx, unit.data.len());
                        continue;
                    }
                }
            }
            if let Some(source) = self.lanes[idx].source.as_ref() {
                source.queue_access_unit(unit);
            }
        }
    }

    /// 不连续点作用于两条轨道：清空 ES 积压（格式变更时连格式一起），
    /// 已有下游队列的直接入队，否则挂起合并（只升不降）。
    pub fn signal_discontinuity(&mut self, ty: DiscontinuityType) {
        info!("基本流不连续点: {:?}", ty);
        for lane in self.lanes.iter_mut() {
            if let Some(queue) = lane.queue.as_mut() {
                queue.clear(ty == DiscontinuityType::FormatChange);
            }
            match lane.source.as_ref() {
                Some(source) => source.queue_discontinuity(ty),
                None => {
                    lane.pending_discontinuity = Some(match lane.pending_discontinuity {
                        Some(p) if p.severity() >= ty.severity() => p,
                        _ => ty,
                    });
                }
            }
        }
    }

    /// 终结两条轨道
    pub fn signal_eos(&mut self, result: &DemuxError) {
        for lane in self.lanes.iter_mut() {
            if let Some(source) = lane.source.as_ref() {
                source.signal_eos(result.replicate());
            }
        }
    }

    pub fn source(&self, lane: Lane) -> Option<Arc<PacketQueue>> {
        self.lanes[lane.index()].source.clone()
    }

    pub fn dequeue_access_unit(&self, lane: Lane) -> Result<crate::core::types::AccessUnit> {
        match self.source(lane) {
            Some(source) => source.dequeue_access_unit(),
            None => Err(DemuxError::WouldBlock),
        }
    }

    pub fn format(&self, lane: Lane) -> Option<MetaData> {
        self.source(lane).and_then(|s| s.format())
    }
}

impl Default for EsParser {
    fn default() -> Self {
        Self::new()
    }
}
