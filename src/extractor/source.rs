use std::process;
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};
use parking_lot::RwLock;

use crate::core::error::{DemuxError, Result};
use crate::core::meta::{MetaData, MetaKey};
use crate::core::mime;
use crate::core::types::{buffer_flags, Lane, StreamType, TrackInfo};
use crate::extractor::node::{
    BufferId, DecodeNode, FlushScope, NodeCommand, NodeConfig, NodeState, ParamKey, ParamValue,
};
use crate::extractor::shared::{
    ExtractorInner, LaneQueues, SharedExtractor, State, WaitOutcome,
};

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 每条轨道队列容量的下限
const MAX_INPUT_BUFFERS: usize = 30;

fn node_error(inner: &ExtractorInner) -> DemuxError {
    DemuxError::NodeError(inner.node_error.unwrap_or(0))
}

/// 解复用前端：包装解码节点，暴露轨道枚举与轨道读取接口。
/// 两条轨道共享同一个 SharedExtractor。
pub struct Extractor {
    shared: Arc<SharedExtractor>,
}

impl Extractor {
    pub fn new(node: Arc<dyn DecodeNode>) -> Result<Self> {
        let shared = SharedExtractor::new(node.clone());
        node.set_observer(shared.clone());

        // 探测各端口的流类型和总时长
        let mut inner = shared.lock();
        for lane in Lane::ALL {
            match node.get_parameter(ParamKey::StreamType(lane.port())) {
                Ok(ParamValue::StreamType(st)) => {
                    inner.stream_type[lane.index()] = st;
                    inner.lane_active[lane.index()] = st.is_some();
                    if let Some(st) = st {
                        info!("{} 🎬 端口 {} 流类型: {}", log_ctx(), lane.port(), st.as_str());
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("{} ⚠️ 端口 {} 流类型探测失败: {}", log_ctx(), lane.port(), e),
            }
        }
        if let Ok(ParamValue::DurationUs(d)) = node.get_parameter(ParamKey::Duration) {
            inner.duration_us = d;
        }
        drop(inner);

        Ok(Self { shared })
    }

    pub fn count_tracks(&self) -> usize {
        let inner = self.shared.lock();
        inner.stream_type.iter().filter(|st| st.is_some()).count()
    }

    /// 构建轨道格式：mime、尺寸 / 音频参数、时长、编解码配置头
    pub fn track_meta(&self, lane: Lane) -> Result<MetaData> {
        let (stream_type, duration_us) = {
            let inner = self.shared.lock();
            (inner.stream_type[lane.index()], inner.duration_us)
        };
        let stream_type = match stream_type {
            Some(st) => st,
            None => return Err(DemuxError::NotFound),
        };

        let mut meta = MetaData::new();
        meta.set_i64(MetaKey::DurationUs, duration_us);
        match stream_type {
            StreamType::H264 => {
                meta.set_str(MetaKey::MimeType, mime::VIDEO_AVC);
                if let Ok(ParamValue::VideoParams { width, height }) =
                    self.shared.node.get_parameter(ParamKey::VideoParams)
                {
                    meta.set_i32(MetaKey::Width, width);
                    meta.set_i32(MetaKey::Height, height);
                    // 高于 QVGA 的视频给更大的输入缓冲上限
                    let max_input = if width as i64 * height as i64 > 320 * 240 {
                        256 * 1024
                    } else {
                        64 * 1024
                    };
                    meta.set_i32(MetaKey::MaxInputSize, max_input);
                }
            }
            StreamType::AacAdts => {
                meta.set_str(MetaKey::MimeType, mime::AUDIO_AAC);
                if let Ok(ParamValue::AudioParams {
                    sample_rate,
                    channels,
                    bit_rate,
                }) = self.shared.node.get_parameter(ParamKey::AudioParams)
                {
                    meta.set_i32(MetaKey::SampleRate, sample_rate);
                    meta.set_i32(MetaKey::ChannelCount, channels);
                    meta.set_i32(MetaKey::BitRate, bit_rate);
                }
            }
        }
        match self.shared.node.codec_header(lane.port()) {
            Ok(header) if !header.is_empty() => meta.set_data(MetaKey::CodecHeader, header),
            Ok(_) => {}
            Err(e) => warn!("{} ⚠️ 端口 {} 无编解码配置头: {}", log_ctx(), lane.port(), e),
        }
        Ok(meta)
    }

    pub fn track_info(&self, lane: Lane) -> Result<TrackInfo> {
        Ok(self.track_meta(lane)?.to_track_info())
    }

    /// 创建轨道读取器；该轨道不存在时返回 NotFound
    pub fn track(&self, lane: Lane) -> Result<TrackSource> {
        let meta = self.track_meta(lane)?;
        Ok(TrackSource {
            lane,
            shared: self.shared.clone(),
            format: RwLock::new(meta),
            started: false,
            stopped: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<SharedExtractor> {
        &self.shared
    }
}

/// read() 的选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// 读取前先定位到该时间（微秒）
    pub seek_to_us: Option<i64>,
}

/// 节点填充好的一块媒体数据。Drop 时缓冲区自动归还空队列。
pub struct MediaBuffer {
    shared: Arc<SharedExtractor>,
    id: BufferId,
    data: Vec<u8>,
    pts_us: i64,
    flags: u32,
}

impl MediaBuffer {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pts_us(&self) -> i64 {
        self.pts_us
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }
}

impl Drop for MediaBuffer {
    fn drop(&mut self) {
        self.shared.return_buffer(self.id);
    }
}

/// 一条轨道的读取接口：start / read / stop
pub struct TrackSource {
    lane: Lane,
    shared: Arc<SharedExtractor>,
    format: RwLock<MetaData>,
    started: bool,
    stopped: bool,
}

impl TrackSource {
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// 当前轨道格式（读取过程中可能并入编解码配置头）
    pub fn format(&self) -> MetaData {
        self.format.read().clone()
    }

    /// 幂等启动。首个启动者负责：分配队列与缓冲区、禁用无轨道的端口、
    /// 驱动节点到 Executing、预充两条轨道、拉起填充线程。
    /// 另一条轨道并发 start 时在 starting 闩上等首启者完成。
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let mut inner = self.shared.lock();
        if inner.error {
            return Err(node_error(&inner));
        }

        if inner.starting {
            let (g, outcome) = self
                .shared
                .wait_on(&self.shared.async_complete, inner, |i| !i.starting);
            inner = g;
            if outcome == WaitOutcome::TimedOut {
                return Err(DemuxError::Timeout("等待并行启动完成".to_string()));
            }
            if inner.error {
                return Err(node_error(&inner));
            }
        }

        if !inner.node_started {
            inner.starting = true;
            match self.first_start(inner) {
                Ok(mut g) => {
                    g.starting = false;
                    self.shared.async_complete.notify_all();
                }
                Err(e) => {
                    self.shared.lock().starting = false;
                    self.shared.async_complete.notify_all();
                    return Err(e);
                }
            }
        }

        self.started = true;
        Ok(())
    }

    /// 首启流程本体。调用方已置起 starting 闩并负责在返回后清除。
    fn first_start<'a>(
        &self,
        mut inner: std::sync::MutexGuard<'a, ExtractorInner>,
    ) -> Result<std::sync::MutexGuard<'a, ExtractorInner>> {
        info!("{} 🚀 启动解码节点", log_ctx());
        for lane in Lane::ALL {
            if !inner.lane_active[lane.index()] {
                if let Err(e) = self
                    .shared
                    .node
                    .send_command(NodeCommand::PortDisable(lane.port()))
                {
                    warn!("{} ⚠️ 禁用端口 {} 失败: {}", log_ctx(), lane.port(), e);
                }
            }
        }

        for lane in Lane::ALL {
            let idx = lane.index();
            if !inner.lane_active[idx] {
                continue;
            }
            let (min_count, buf_size) = match self
                .shared
                .node
                .get_parameter(ParamKey::PortDefinition(lane.port()))?
            {
                ParamValue::PortDefinition {
                    min_buffer_count,
                    buffer_size,
                } => (min_buffer_count, buffer_size),
                _ => {
                    return Err(DemuxError::Other(
                        "端口定义查询返回类型不符".to_string(),
                    ))
                }
            };
            let capacity = min_count.max(MAX_INPUT_BUFFERS);
            let mut queues = LaneQueues::new(capacity, capacity)?;
            for _ in 0..min_count {
                let id = self.shared.node.allocate_buffer(lane.port(), buf_size)?;
                while queues.arena.len() <= id.slot {
                    queues.arena.push(None);
                }
                queues.empty.enqueue(id)?;
                inner.allocated[idx].push(id);
            }
            info!(
                "{} 📦 轨道 {} 分配 {} 个缓冲区（每个 {} 字节）",
                log_ctx(),
                lane.as_str(),
                min_count,
                buf_size
            );
            inner.queues[idx] = Some(queues);
        }

        inner.state = State::LoadedToIdle;
        self.shared
            .node
            .send_command(NodeCommand::SetState(NodeState::Idle))?;
        inner = self.shared.wait_for_state(inner, State::Executing, "启动")?;
        if inner.state == State::Error {
            return Err(node_error(&inner));
        }
        inner.node_started = true;

        for lane in Lane::ALL {
            self.shared.prime_lane(&inner, lane);
        }

        inner.worker_active = true;
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("fill-worker".to_string())
            .spawn(move || fill_worker(shared))
            .map_err(DemuxError::IoError)?;
        inner.worker = Some(handle);
        Ok(inner)
    }

    /// 读取下一个填充好的缓冲区；必要时先执行 seek。
    /// EOS 与节点错误都是粘性的：之后的每次调用稳定返回同一结果。
    pub fn read(&mut self, options: &ReadOptions) -> Result<MediaBuffer> {
        if !self.started {
            return Err(DemuxError::InvalidArgument("轨道尚未启动".to_string()));
        }
        let idx = self.lane.index();
        let mut inner = self.shared.lock();

        if let Some(target) = options.seek_to_us {
            inner = self.seek_locked(inner, target)?;
        }

        loop {
            if inner.queues[idx].is_none() {
                return Err(DemuxError::EndOfStream);
            }
            let filled_len = match inner.queues[idx].as_ref() {
                Some(q) => q.filled.len(),
                None => 0,
            };
            if filled_len == 0 {
                if inner.error {
                    return Err(node_error(&inner));
                }
                if inner.eos[idx] {
                    return Err(DemuxError::EndOfStream);
                }
                inner = self.shared.wait_cv(&self.shared.lane_filled[idx], inner);
                continue;
            }

            let (id, payload) = match inner.queues[idx].as_mut() {
                Some(q) => {
                    let id = q.filled.dequeue()?;
                    let payload = if id.slot < q.arena.len() {
                        q.arena[id.slot].take()
                    } else {
                        None
                    };
                    (id, payload)
                }
                None => continue,
            };
            let payload = match payload {
                Some(p) => p,
                None => {
                    // 内容缺失（排空竞争），直接归还
                    if let Some(q) = inner.queues[idx].as_ref() {
                        let _ = q.empty.enqueue(id);
                    }
                    continue;
                }
            };

            if payload.data.is_empty() && payload.flags & buffer_flags::EOS != 0 {
                // 零长度 EOS 缓冲：归还并转为流结束
                inner.eos[idx] = true;
                if let Some(q) = inner.queues[idx].as_ref() {
                    let _ = q.empty.enqueue(id);
                }
                self.shared.fill_available.notify_all();
                continue;
            }

            if payload.flags & buffer_flags::CODEC_CONFIG != 0 {
                info!(
                    "{} 📦 轨道 {} 收到编解码配置 ({} 字节)，并入格式",
                    log_ctx(),
                    self.lane.as_str(),
                    payload.data.len()
                );
                self.format
                    .write()
                    .set_data(MetaKey::CodecHeader, payload.data);
                if let Some(q) = inner.queues[idx].as_ref() {
                    let _ = q.empty.enqueue(id);
                }
                self.shared.fill_available.notify_all();
                continue;
            }

            return Ok(MediaBuffer {
                shared: self.shared.clone(),
                id,
                data: payload.data,
                pts_us: payload.pts_us,
                flags: payload.flags,
            });
        }
    }

    /// seek 流程：暂停 → 排空 → 刷新 → 定位 → 预充 → 恢复。
    /// EOS 之后禁止 seek（纯音频流除外，其 EOS 会被重置）。
    fn seek_locked<'a>(
        &self,
        mut inner: std::sync::MutexGuard<'a, ExtractorInner>,
        target_us: i64,
    ) -> Result<std::sync::MutexGuard<'a, ExtractorInner>> {
        let idx = self.lane.index();
        let audio_only = inner.single_lane() == Some(Lane::Audio);
        if inner.eos[idx] && !audio_only {
            return Err(DemuxError::EndOfStream);
        }
        if inner.error {
            return Err(node_error(&inner));
        }
        info!("{} ⏩ seek 到 {}us", log_ctx(), target_us);

        inner.seeking = true;
        inner.state = State::ExecutingToPause;
        self.shared
            .node
            .send_command(NodeCommand::SetState(NodeState::Pause))?;
        inner = self.shared.wait_for_state(inner, State::Pause, "seek 暂停")?;
        if inner.state == State::Error {
            inner.seeking = false;
            return Err(node_error(&inner));
        }

        for lane in Lane::ALL {
            self.shared.drain_lane(&mut inner, lane);
        }

        let scope = match inner.single_lane() {
            Some(l) => FlushScope::Port(l.port()),
            None => FlushScope::All,
        };
        inner.pending_flush = Some(scope);
        self.shared.node.send_command(NodeCommand::Flush(scope))?;
        let cv = match scope {
            FlushScope::All => &self.shared.flush_all,
            FlushScope::Port(_) => &self.shared.flush_port,
        };
        let (g, outcome) = self
            .shared
            .wait_on(cv, inner, |i| i.pending_flush.is_none() || i.error);
        inner = g;
        if outcome == WaitOutcome::TimedOut {
            inner.seeking = false;
            error!("{} ⏰ 等待刷新完成超时", log_ctx());
            return Err(DemuxError::Timeout("等待刷新完成".to_string()));
        }
        if inner.error {
            inner.seeking = false;
            return Err(node_error(&inner));
        }
        for lane in Lane::ALL {
            self.shared.drain_lane(&mut inner, lane);
        }

        match self
            .shared
            .node
            .set_config(NodeConfig::SeekPosition(target_us))
        {
            Ok(()) => {
                for lane in Lane::ALL {
                    self.shared.prime_lane(&inner, lane);
                }
                // 纯音频或回到起点：清除 EOS，允许继续读取
                if audio_only || target_us == 0 {
                    inner.eos = [false, false];
                }
            }
            Err(e) => {
                // 定位失败按流结束处理
                warn!("{} ⚠️ seek 配置失败，按 EOS 处理: {}", log_ctx(), e);
                inner.eos = [true, true];
            }
        }

        inner.seeking = false;
        self.shared.seek_resume.notify_all();
        self.shared.fill_available.notify_all();

        inner.state = State::PauseToExecuting;
        self.shared
            .node
            .send_command(NodeCommand::SetState(NodeState::Executing))?;
        inner = self.shared.wait_for_state(inner, State::Executing, "seek 恢复")?;
        if inner.state == State::Error {
            return Err(node_error(&inner));
        }
        Ok(inner)
    }

    /// 停止本轨道。最后一条停止的轨道负责把节点驱回 Loaded。
    /// stop 之后本轨道不再持有任何缓冲区。
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped || !self.started {
            self.stopped = true;
            return Ok(());
        }
        let idx = self.lane.index();
        let port = self.lane.port();
        let mut inner = self.shared.lock();

        // 等待瞬态结束后再拆
        let (g, outcome) = self
            .shared
            .wait_on(&self.shared.async_complete, inner, |i| {
                !i.state.is_intermediate()
            });
        inner = g;
        if outcome == WaitOutcome::TimedOut {
            warn!("{} ⚠️ 等待瞬态结束超时，继续拆除", log_ctx());
        }
        inner.lane_done[idx] = true;

        // 首个 stop 负责停掉填充线程
        inner.stop_worker = true;
        self.shared.seek_resume.notify_all();
        self.shared.fill_available.notify_all();
        if let Some(handle) = inner.worker.take() {
            drop(inner);
            if handle.join().is_err() {
                error!("{} ❌ 填充线程异常退出", log_ctx());
            }
            inner = self.shared.lock();
        }

        // 刷回节点内滞留的缓冲区
        if inner.node_started && !inner.error {
            inner.pending_flush = Some(FlushScope::Port(port));
            match self
                .shared
                .node
                .send_command(NodeCommand::Flush(FlushScope::Port(port)))
            {
                Ok(()) => {
                    let (g, outcome) = self
                        .shared
                        .wait_on(&self.shared.flush_port, inner, |i| {
                            i.pending_flush.is_none() || i.error
                        });
                    inner = g;
                    if outcome == WaitOutcome::TimedOut {
                        warn!("{} ⚠️ 等待端口 {} 刷新超时", log_ctx(), port);
                        inner.pending_flush = None;
                    }
                }
                Err(e) => {
                    warn!("{} ⚠️ 刷新端口 {} 失败: {}", log_ctx(), port, e);
                    inner.pending_flush = None;
                }
            }
        }

        // 回收、释放、拆队列
        self.shared.drain_lane(&mut inner, self.lane);
        for id in std::mem::take(&mut inner.allocated[idx]) {
            if let Err(e) = self.shared.node.free_buffer(id) {
                warn!("{} ⚠️ 释放缓冲区 {:?} 失败: {}", log_ctx(), id, e);
            }
        }
        inner.queues[idx] = None;
        info!("{} 🛑 轨道 {} 已停止", log_ctx(), self.lane.as_str());

        let all_done = Lane::ALL
            .iter()
            .all(|l| !inner.lane_active[l.index()] || inner.lane_done[l.index()]);
        if all_done && inner.node_started {
            if inner.error {
                warn!("{} ⚠️ 节点处于错误状态，跳过回 Loaded 流程", log_ctx());
            } else {
                inner.state = State::ExecutingToIdle;
                self.shared
                    .node
                    .send_command(NodeCommand::SetState(NodeState::Idle))?;
                inner = self.shared.wait_for_state(inner, State::Loaded, "停止")?;
            }
            inner.node_started = false;
            info!("{} ✅ 节点回到 Loaded", log_ctx());
        }

        self.stopped = true;
        Ok(())
    }
}

/// 填充线程：把空缓冲区交给节点。
/// seek 期间挂起；两侧都无空缓冲区时等待归还信号；stop 时退出。
fn fill_worker(shared: Arc<SharedExtractor>) {
    info!("{} 🧵 填充线程启动", log_ctx());
    let mut inner = shared.lock();
    loop {
        if inner.stop_worker || inner.error {
            break;
        }
        if inner.seeking {
            inner = shared.wait_cv(&shared.seek_resume, inner);
            continue;
        }

        let mut had_entry = false;
        for lane in Lane::ALL {
            let idx = lane.index();
            if !inner.lane_active[idx] || inner.lane_done[idx] || inner.eos[idx] {
                continue;
            }
            if let Some(queues) = inner.queues[idx].as_ref() {
                if let Ok(id) = queues.empty.dequeue() {
                    match shared.node.fill_buffer(id) {
                        Ok(()) => had_entry = true,
                        Err(e) => {
                            // 失败不计入 had_entry：回队后统一落入放锁等待
                            warn!("{} ⚠️ 填充请求失败: {}，缓冲区回队", log_ctx(), e);
                            if queues.empty.enqueue(id).is_err() {
                                error!("{} ❌ 回队失败，缓冲区 {:?} 丢失", log_ctx(), id);
                            }
                        }
                    }
                }
            }
        }

        if !had_entry {
            inner.fill_wait = true;
            inner = shared.wait_cv(&shared.fill_available, inner);
            inner.fill_wait = false;
        }
    }
    inner.worker_active = false;
    drop(inner);
    info!("{} 🧵 填充线程退出", log_ctx());
}
