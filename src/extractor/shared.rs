use std::process;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::core::error::{DemuxError, Result};
use crate::core::types::{Lane, StreamType};
use crate::extractor::node::{
    BufferId, CommandComplete, DecodeNode, FlushScope, NodeCommand, NodeEvent, NodeObserver,
    NodeState,
};
use crate::extractor::ring_queue::RingQueue;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 编排器状态机
///
/// 瞬态（*To*）只由节点事件回调推进到稳定态；Error 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Loaded,
    LoadedToIdle,
    IdleToExecuting,
    Executing,
    ExecutingToIdle,
    ExecutingToPause,
    Pause,
    PauseToExecuting,
    IdleToLoaded,
    Error,
}

impl State {
    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            State::LoadedToIdle
                | State::IdleToExecuting
                | State::ExecutingToIdle
                | State::ExecutingToPause
                | State::PauseToExecuting
                | State::IdleToLoaded
        )
    }
}

/// 单次等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

/// 节点填充完毕的缓冲区内容，按 BufferId.slot 存放
pub struct FilledPayload {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: u32,
}

/// 单条轨道的缓冲区管理：空队列、满队列、内容竞技场
pub struct LaneQueues {
    pub empty: RingQueue<BufferId>,
    pub filled: RingQueue<BufferId>,
    pub arena: Vec<Option<FilledPayload>>,
}

impl LaneQueues {
    pub fn new(max_entries: usize, arena_size: usize) -> Result<Self> {
        let mut arena = Vec::with_capacity(arena_size);
        arena.resize_with(arena_size, || None);
        Ok(Self {
            empty: RingQueue::new(max_entries)?,
            filled: RingQueue::new(max_entries)?,
            arena,
        })
    }
}

/// 互斥保护下的全部可变状态
pub struct ExtractorInner {
    pub state: State,
    /// 每条轨道的队列；stop 拆除后置 None，晚到的节点事件直接丢弃
    pub queues: [Option<LaneQueues>; 2],
    /// 节点已上报该端口 EOS
    pub eos: [bool; 2],
    /// 该轨道存在且被使用
    pub lane_active: [bool; 2],
    /// 该轨道已 stop 完毕
    pub lane_done: [bool; 2],
    /// 各端口已向节点分配的缓冲区
    pub allocated: [Vec<BufferId>; 2],
    pub stream_type: [Option<StreamType>; 2],
    pub duration_us: i64,
    /// seek 进行中：填充线程须暂停取空缓冲区
    pub seeking: bool,
    /// 填充线程正因两侧都无空缓冲区而等待
    pub fill_wait: bool,
    pub stop_worker: bool,
    pub worker_active: bool,
    /// 节点已完成 start 流程（Executing）
    pub node_started: bool,
    /// 首启流程进行中；后到的 start 在 async_complete 上等它结束。
    /// wait_for_state 会放锁，仅靠 node_started 判断会让并发 start 重复分配。
    pub starting: bool,
    /// 节点上报过不可忽略的错误
    pub error: bool,
    pub node_error: Option<u32>,
    /// 已发出、尚未回执的刷新命令
    pub pending_flush: Option<FlushScope>,
    pub worker: Option<JoinHandle<()>>,
}

impl ExtractorInner {
    fn new() -> Self {
        Self {
            state: State::Loaded,
            queues: [None, None],
            eos: [false, false],
            lane_active: [false, false],
            lane_done: [false, false],
            allocated: [Vec::new(), Vec::new()],
            stream_type: [None, None],
            duration_us: 0,
            seeking: false,
            fill_wait: false,
            stop_worker: false,
            worker_active: false,
            node_started: false,
            starting: false,
            error: false,
            node_error: None,
            pending_flush: None,
            worker: None,
        }
    }

    /// 仅单条轨道在用
    pub fn single_lane(&self) -> Option<Lane> {
        match (self.lane_active[0], self.lane_active[1]) {
            (true, false) => Some(Lane::Video),
            (false, true) => Some(Lane::Audio),
            _ => None,
        }
    }
}

/// 两条轨道共享的编排器状态
///
/// 条件变量按用途拆分：填充线程、每轨道的「有满缓冲区」、
/// 单端口刷新完成、全端口刷新完成、seek 放行、异步命令完成。
pub struct SharedExtractor {
    pub node: Arc<dyn DecodeNode>,
    pub inner: Mutex<ExtractorInner>,
    pub fill_available: Condvar,
    pub lane_filled: [Condvar; 2],
    pub flush_port: Condvar,
    pub flush_all: Condvar,
    pub seek_resume: Condvar,
    pub async_complete: Condvar,
}

/// 每 500ms 醒一次、最多 20 次 ≈ 10 秒的状态等待预算
const WAIT_SLICE: Duration = Duration::from_millis(500);
const WAIT_MAX_RETRIES: u32 = 20;

impl SharedExtractor {
    pub fn new(node: Arc<dyn DecodeNode>) -> Arc<Self> {
        Arc::new(Self {
            node,
            inner: Mutex::new(ExtractorInner::new()),
            fill_available: Condvar::new(),
            lane_filled: [Condvar::new(), Condvar::new()],
            flush_port: Condvar::new(),
            flush_all: Condvar::new(),
            seek_resume: Condvar::new(),
            async_complete: Condvar::new(),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, ExtractorInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 有界重试等待，直到 `done` 成立或超时。
    /// 超时不 panic，作为可上报的 TimedOut 交给调用方决定。
    pub fn wait_on<'a, F>(
        &self,
        cv: &Condvar,
        mut guard: MutexGuard<'a, ExtractorInner>,
        mut done: F,
    ) -> (MutexGuard<'a, ExtractorInner>, WaitOutcome)
    where
        F: FnMut(&ExtractorInner) -> bool,
    {
        let mut retries = 0;
        while !done(&guard) {
            if retries >= WAIT_MAX_RETRIES {
                return (guard, WaitOutcome::TimedOut);
            }
            let (g, timeout) = match cv.wait_timeout(guard, WAIT_SLICE) {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard = g;
            if timeout.timed_out() {
                retries += 1;
            }
        }
        (guard, WaitOutcome::Completed)
    }

    /// 无预算的条件变量等待（调用方的外层循环负责重新检查条件）
    pub fn wait_cv<'a>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, ExtractorInner>,
    ) -> MutexGuard<'a, ExtractorInner> {
        match cv.wait(guard) {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 读取方用完缓冲区后归还：回到空队列并唤醒填充线程
    pub fn return_buffer(&self, id: BufferId) {
        let inner = self.lock();
        let idx = id.port as usize;
        if idx >= 2 {
            return;
        }
        if let Some(queues) = inner.queues[idx].as_ref() {
            if let Err(e) = queues.empty.enqueue(id) {
                warn!("{} ⚠️ 归还缓冲区失败: {}", log_ctx(), e);
                return;
            }
            self.fill_available.notify_all();
        }
    }

    /// 把某轨道所有已填充的缓冲区倒回空队列（丢弃内容）
    pub fn drain_lane(&self, inner: &mut ExtractorInner, lane: Lane) {
        let idx = lane.index();
        if let Some(queues) = inner.queues[idx].as_mut() {
            while let Ok(id) = queues.filled.dequeue() {
                if id.slot < queues.arena.len() {
                    queues.arena[id.slot] = None;
                }
                if let Err(e) = queues.empty.enqueue(id) {
                    warn!("{} ⚠️ 排空时空队列入队失败: {}", log_ctx(), e);
                }
            }
        }
    }

    /// 把某轨道所有空缓冲区交给节点填充
    pub fn prime_lane(&self, inner: &ExtractorInner, lane: Lane) {
        let idx = lane.index();
        if !inner.lane_active[idx] || inner.lane_done[idx] {
            return;
        }
        if let Some(queues) = inner.queues[idx].as_ref() {
            while let Ok(id) = queues.empty.dequeue() {
                if let Err(e) = self.node.fill_buffer(id) {
                    warn!("{} ⚠️ 预充填充请求失败: {}，缓冲区回队", log_ctx(), e);
                    if queues.empty.enqueue(id).is_err() {
                        error!("{} ❌ 预充回队失败，缓冲区 {:?} 丢失", log_ctx(), id);
                    }
                    break;
                }
            }
        }
    }

    /// 等待状态机到达 `target`（或落入 Error）
    pub fn wait_for_state<'a>(
        &self,
        guard: MutexGuard<'a, ExtractorInner>,
        target: State,
        what: &str,
    ) -> Result<MutexGuard<'a, ExtractorInner>> {
        let (guard, outcome) = self.wait_on(&self.async_complete, guard, |inner| {
            inner.state == target || inner.state == State::Error
        });
        match outcome {
            WaitOutcome::TimedOut => {
                error!("{} ⏰ 等待状态 {:?} 超时: {}", log_ctx(), target, what);
                Err(DemuxError::Timeout(format!("等待状态 {:?}: {}", target, what)))
            }
            WaitOutcome::Completed => Ok(guard),
        }
    }

    /// 状态事件到达后的提交与自动续跳
    fn commit_state(&self, inner: &mut ExtractorInner, reached: NodeState) {
        match (reached, inner.state) {
            (NodeState::Idle, State::LoadedToIdle) => {
                inner.state = State::IdleToExecuting;
                if let Err(e) = self
                    .node
                    .send_command(NodeCommand::SetState(NodeState::Executing))
                {
                    error!("{} ❌ 续发 Executing 命令失败: {}", log_ctx(), e);
                    inner.error = true;
                    inner.state = State::Error;
                }
            }
            (NodeState::Idle, State::ExecutingToIdle) => {
                inner.state = State::IdleToLoaded;
                if let Err(e) = self
                    .node
                    .send_command(NodeCommand::SetState(NodeState::Loaded))
                {
                    error!("{} ❌ 续发 Loaded 命令失败: {}", log_ctx(), e);
                    inner.error = true;
                    inner.state = State::Error;
                }
            }
            (NodeState::Executing, State::IdleToExecuting)
            | (NodeState::Executing, State::PauseToExecuting) => {
                inner.state = State::Executing;
            }
            (NodeState::Pause, State::ExecutingToPause) => {
                inner.state = State::Pause;
            }
            (NodeState::Loaded, State::IdleToLoaded) => {
                inner.state = State::Loaded;
            }
            (reached, current) => {
                warn!(
                    "{} ⚠️ 意外的状态回执: 到达 {:?}，当前 {:?}",
                    log_ctx(),
                    reached,
                    current
                );
            }
        }
    }

    fn handle_fill_done(
        &self,
        inner: &mut ExtractorInner,
        id: BufferId,
        data: Vec<u8>,
        pts_us: i64,
        flags: u32,
    ) {
        let idx = id.port as usize;
        if idx >= 2 {
            warn!("{} ⚠️ 未知端口的填充回执: {}", log_ctx(), id.port);
            return;
        }
        // stop 之后队列已拆除，晚到的回执直接丢弃
        if let Some(queues) = inner.queues[idx].as_mut() {
            if id.slot < queues.arena.len() {
                queues.arena[id.slot] = Some(FilledPayload {
                    data,
                    pts_us,
                    flags,
                });
                if let Err(e) = queues.filled.enqueue(id) {
                    error!("{} ❌ 满队列入队失败: {}", log_ctx(), e);
                    return;
                }
                self.lane_filled[idx].notify_all();
            } else {
                warn!("{} ⚠️ 填充回执槽位越界: {:?}", log_ctx(), id);
            }
        }
    }
}

impl NodeObserver for SharedExtractor {
    /// 唯一的事件入口。持共享锁处理，与 start/read/stop 串行。
    fn on_event(&self, event: NodeEvent) {
        let mut inner = self.lock();
        match event {
            NodeEvent::CommandComplete(CommandComplete::StateReached(ns)) => {
                info!("{} ✅ 节点到达状态 {:?}（当前 {:?}）", log_ctx(), ns, inner.state);
                self.commit_state(&mut inner, ns);
                self.async_complete.notify_all();
            }
            NodeEvent::CommandComplete(CommandComplete::Flushed(scope)) => {
                info!("{} 🧹 刷新完成: {:?}", log_ctx(), scope);
                inner.pending_flush = None;
                match scope {
                    FlushScope::All => self.flush_all.notify_all(),
                    FlushScope::Port(_) => self.flush_port.notify_all(),
                }
            }
            NodeEvent::CommandComplete(CommandComplete::PortDisabled(port)) => {
                info!("{} ✅ 端口 {} 已禁用", log_ctx(), port);
                self.async_complete.notify_all();
            }
            NodeEvent::BufferFlag { port, eos } => {
                if eos {
                    let idx = port as usize;
                    if idx < 2 {
                        info!("{} 🏁 端口 {} 上报 EOS", log_ctx(), port);
                        inner.eos[idx] = true;
                    }
                    // 两侧都唤醒：EOF 判定读取任一轨道时都要重新评估
                    self.lane_filled[0].notify_all();
                    self.lane_filled[1].notify_all();
                }
            }
            NodeEvent::FillBufferDone {
                id,
                data,
                pts_us,
                flags,
            } => {
                self.handle_fill_done(&mut inner, id, data, pts_us, flags);
            }
            NodeEvent::Error { code } => {
                if code.is_benign() {
                    warn!("{} ⚠️ 忽略节点良性错误: {:?}", log_ctx(), code);
                } else {
                    error!("{} ❌ 节点致命错误: {:?}", log_ctx(), code);
                    inner.error = true;
                    inner.node_error = Some(code.code());
                    inner.state = State::Error;
                    inner.pending_flush = None;
                    // 唤醒所有等待者，让它们观察到错误
                    self.lane_filled[0].notify_all();
                    self.lane_filled[1].notify_all();
                    self.fill_available.notify_all();
                    self.seek_resume.notify_all();
                    self.async_complete.notify_all();
                    self.flush_port.notify_all();
                    self.flush_all.notify_all();
                }
            }
        }
    }
}
