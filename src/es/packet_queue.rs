use std::collections::VecDeque;
use std::sync::Mutex;

use log::info;

use crate::core::error::{DemuxError, Result};
use crate::core::meta::MetaData;
use crate::core::types::{AccessUnit, DiscontinuityType};

/// 单条轨道的访问单元队列（下游消费对象）。
///
/// EOS / 终结错误是粘性的：队列读空之后每次出队都稳定复述同一结果。
pub struct PacketQueue {
    inner: Mutex<PacketQueueInner>,
}

struct PacketQueueInner {
    queue: VecDeque<AccessUnit>,
    format: Option<MetaData>,
    final_result: Option<DemuxError>,
    /// 尚未附着到任何单元的不连续点
    pending_discontinuity: Option<DiscontinuityType>,
}

impl PacketQueue {
    pub fn new(format: Option<MetaData>) -> Self {
        Self {
            inner: Mutex::new(PacketQueueInner {
                queue: VecDeque::new(),
                format,
                final_result: None,
                pending_discontinuity: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PacketQueueInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn queue_access_unit(&self, mut unit: AccessUnit) {
        let mut inner = self.lock();
        // 挂起的不连续点附着在下一个入队的单元上
        if let Some(ty) = inner.pending_discontinuity.take() {
            unit.discontinuity = Some(ty);
        }
        inner.queue.push_back(unit);
    }

    /// 出队：空且已终结时复述终结结果，空但未终结时 WouldBlock
    pub fn dequeue_access_unit(&self) -> Result<AccessUnit> {
        let mut inner = self.lock();
        if let Some(unit) = inner.queue.pop_front() {
            return Ok(unit);
        }
        match &inner.final_result {
            Some(err) => Err(err.replicate()),
            None => Err(DemuxError::WouldBlock),
        }
    }

    /// 不连续点：丢弃积压的单元；格式变更时连同格式一起作废。
    /// 与已挂起的不连续点合并时只升不降。
    pub fn queue_discontinuity(&self, ty: DiscontinuityType) {
        let mut inner = self.lock();
        let dropped = inner.queue.len();
        inner.queue.clear();
        if dropped > 0 {
            info!("不连续点 {:?}：丢弃 {} 个积压单元", ty, dropped);
        }
        if ty == DiscontinuityType::FormatChange {
            inner.format = None;
        }
        inner.pending_discontinuity = Some(match inner.pending_discontinuity {
            Some(p) if p.severity() >= ty.severity() => p,
            _ => ty,
        });
    }

    pub fn signal_eos(&self, result: DemuxError) {
        let mut inner = self.lock();
        if inner.final_result.is_none() {
            inner.final_result = Some(result);
        }
    }

    pub fn set_format(&self, format: MetaData) {
        self.lock().format = Some(format);
    }

    pub fn format(&self) -> Option<MetaData> {
        self.lock().format.clone()
    }

    pub fn has_buffer_available(&self) -> bool {
        !self.lock().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(tag: u8, pts: i64) -> AccessUnit {
        AccessUnit::new(vec![tag], pts)
    }

    #[test]
    fn test_fifo_and_would_block() {
        let q = PacketQueue::new(None);
        q.queue_access_unit(unit(1, 10));
        q.queue_access_unit(unit(2, 20));

        assert_eq!(q.dequeue_access_unit().unwrap().pts_us, 10);
        assert_eq!(q.dequeue_access_unit().unwrap().pts_us, 20);
        assert!(matches!(
            q.dequeue_access_unit(),
            Err(DemuxError::WouldBlock)
        ));
    }

    #[test]
    fn test_eos_sticky_after_drain() {
        let q = PacketQueue::new(None);
        q.queue_access_unit(unit(1, 0));
        q.signal_eos(DemuxError::EndOfStream);

        // 先读完积压数据
        assert!(q.dequeue_access_unit().is_ok());
        assert!(matches!(
            q.dequeue_access_unit(),
            Err(DemuxError::EndOfStream)
        ));
        assert!(matches!(
            q.dequeue_access_unit(),
            Err(DemuxError::EndOfStream)
        ));
    }

    #[test]
    fn test_discontinuity_clears_and_attaches() {
        let q = PacketQueue::new(None);
        q.queue_access_unit(unit(1, 0));
        q.queue_discontinuity(DiscontinuityType::Seek);
        // 积压被丢弃
        assert!(matches!(
            q.dequeue_access_unit(),
            Err(DemuxError::WouldBlock)
        ));

        q.queue_access_unit(unit(2, 100));
        let au = q.dequeue_access_unit().unwrap();
        assert_eq!(au.discontinuity, Some(DiscontinuityType::Seek));

        // 后续单元不再携带标记
        q.queue_access_unit(unit(3, 200));
        assert_eq!(q.dequeue_access_unit().unwrap().discontinuity, None);
    }

    #[test]
    fn test_discontinuity_merge_only_upgrades() {
        let q = PacketQueue::new(None);
        q.queue_discontinuity(DiscontinuityType::FormatChange);
        q.queue_discontinuity(DiscontinuityType::Seek);
        q.queue_access_unit(unit(1, 0));
        assert_eq!(
            q.dequeue_access_unit().unwrap().discontinuity,
            Some(DiscontinuityType::FormatChange)
        );
    }

    #[test]
    fn test_format_change_invalidates_format() {
        let q = PacketQueue::new(Some(MetaData::new()));
        assert!(q.format().is_some());
        q.queue_discontinuity(DiscontinuityType::Seek);
        assert!(q.format().is_some());
        q.queue_discontinuity(DiscontinuityType::FormatChange);
        assert!(q.format().is_none());
    }
}
