//! 测试用的脚本化解码节点。
//!
//! 所有命令异步回执：事件由独立线程投递，避免与编排器的锁重入。

use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::RwLock;

use crate::core::error::{DemuxError, Result};
use crate::core::types::StreamType;
use crate::extractor::node::{
    BufferId, CommandComplete, DecodeNode, NodeCommand, NodeConfig, NodeErrorCode, NodeEvent,
    NodeObserver, ParamKey, ParamValue,
};

/// 一条脚本化样本
#[derive(Clone)]
pub struct MockSample {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: u32,
}

impl MockSample {
    pub fn new(data: Vec<u8>, pts_us: i64) -> Self {
        Self {
            data,
            pts_us,
            flags: 0,
        }
    }

    pub fn with_flags(data: Vec<u8>, pts_us: i64, flags: u32) -> Self {
        Self {
            data,
            pts_us,
            flags,
        }
    }
}

enum Job {
    Deliver(NodeEvent),
    Fill(BufferId),
    Stop,
}

struct MockState {
    samples: [Vec<MockSample>; 2],
    cursor: [usize; 2],
    eos_sent: [bool; 2],
    next_slot: [usize; 2],
    outstanding: [isize; 2],
    stream_type: [Option<StreamType>; 2],
    duration_us: i64,
    video_dims: (i32, i32),
    codec_header: [Vec<u8>; 2],
    min_buffer_count: usize,
    buffer_size: usize,
    ack_delay: Option<Duration>,
    fail_fills: bool,
}

pub struct MockNode {
    // Weak 存储，避免与编排器互持 Arc 形成环
    observer: RwLock<Option<Weak<dyn NodeObserver>>>,
    jobs: Sender<Job>,
    state: Arc<Mutex<MockState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MockNode {
    pub fn new(
        video: Option<Vec<MockSample>>,
        audio: Option<Vec<MockSample>>,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(MockState {
            stream_type: [
                video.as_ref().map(|_| StreamType::H264),
                audio.as_ref().map(|_| StreamType::AacAdts),
            ],
            samples: [video.unwrap_or_default(), audio.unwrap_or_default()],
            cursor: [0, 0],
            eos_sent: [false, false],
            next_slot: [0, 0],
            outstanding: [0, 0],
            duration_us: 10_000_000,
            video_dims: (640, 480),
            codec_header: [Vec::new(), Vec::new()],
            min_buffer_count: 2,
            buffer_size: 4096,
            ack_delay: None,
            fail_fills: false,
        }));

        let (tx, rx) = unbounded::<Job>();
        let node = Arc::new(Self {
            observer: RwLock::new(None),
            jobs: tx,
            state: state.clone(),
            worker: Mutex::new(None),
        });

        let worker_node = Arc::downgrade(&node);
        let handle = thread::spawn(move || {
            for job in rx.iter() {
                let node = match worker_node.upgrade() {
                    Some(n) => n,
                    None => break,
                };
                match job {
                    Job::Stop => break,
                    Job::Deliver(event) => {
                        if matches!(event, NodeEvent::CommandComplete(_)) {
                            let delay = node.state.lock().unwrap().ack_delay;
                            if let Some(d) = delay {
                                thread::sleep(d);
                            }
                        }
                        node.deliver(event);
                    }
                    Job::Fill(id) => node.handle_fill(id),
                }
            }
        });
        *node.worker.lock().unwrap() = Some(handle);
        node
    }

    /// 从外部注入一个事件（测试错误路径用）
    pub fn inject(&self, event: NodeEvent) {
        let _ = self.jobs.send(Job::Deliver(event));
    }

    pub fn inject_error(&self, code: NodeErrorCode) {
        self.inject(NodeEvent::Error { code });
    }

    /// 尚未释放的缓冲区数量
    pub fn outstanding(&self, port: u32) -> isize {
        self.state.lock().unwrap().outstanding[port as usize]
    }

    pub fn set_codec_header(&self, port: u32, header: Vec<u8>) {
        self.state.lock().unwrap().codec_header[port as usize] = header;
    }

    /// 延迟所有命令回执，放大并发时序窗口
    pub fn set_ack_delay(&self, delay: Duration) {
        self.state.lock().unwrap().ack_delay = Some(delay);
    }

    /// 之后的填充请求一律拒绝
    pub fn set_fill_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_fills = fail;
    }

    fn deliver(&self, event: NodeEvent) {
        let observer = self.observer.read().as_ref().and_then(|w| w.upgrade());
        if let Some(obs) = observer {
            obs.on_event(event);
        }
    }

    fn handle_fill(&self, id: BufferId) {
        let idx = id.port as usize;
        let (sample, signal_eos) = {
            let mut st = self.state.lock().unwrap();
            if st.cursor[idx] < st.samples[idx].len() {
                let s = st.samples[idx][st.cursor[idx]].clone();
                st.cursor[idx] += 1;
                (Some(s), false)
            } else {
                let first_eos = !st.eos_sent[idx];
                st.eos_sent[idx] = true;
                (None, first_eos)
            }
        };
        match sample {
            Some(s) => self.deliver(NodeEvent::FillBufferDone {
                id,
                data: s.data,
                pts_us: s.pts_us,
                flags: s.flags,
            }),
            None => {
                if signal_eos {
                    self.deliver(NodeEvent::BufferFlag {
                        port: id.port,
                        eos: true,
                    });
                }
                // 零长度 EOS 缓冲
                self.deliver(NodeEvent::FillBufferDone {
                    id,
                    data: Vec::new(),
                    pts_us: 0,
                    flags: crate::core::types::buffer_flags::EOS,
                });
            }
        }
    }
}

impl DecodeNode for MockNode {
    fn set_observer(&self, observer: Arc<dyn NodeObserver>) {
        *self.observer.write() = Some(Arc::downgrade(&observer));
    }

    fn send_command(&self, command: NodeCommand) -> Result<()> {
        let ack = match command {
            NodeCommand::SetState(s) => CommandComplete::StateReached(s),
            NodeCommand::PortDisable(p) => CommandComplete::PortDisabled(p),
            NodeCommand::Flush(scope) => CommandComplete::Flushed(scope),
        };
        self.jobs
            .send(Job::Deliver(NodeEvent::CommandComplete(ack)))
            .map_err(|_| DemuxError::Other("模拟节点已关闭".to_string()))
    }

    fn get_parameter(&self, key: ParamKey) -> Result<ParamValue> {
        let st = self.state.lock().unwrap();
        match key {
            ParamKey::PortDefinition(_) => Ok(ParamValue::PortDefinition {
                min_buffer_count: st.min_buffer_count,
                buffer_size: st.buffer_size,
            }),
            ParamKey::StreamType(port) => {
                Ok(ParamValue::StreamType(st.stream_type[port as usize]))
            }
            ParamKey::Duration => Ok(ParamValue::DurationUs(st.duration_us)),
            ParamKey::VideoParams => Ok(ParamValue::VideoParams {
                width: st.video_dims.0,
                height: st.video_dims.1,
            }),
            ParamKey::AudioParams => Ok(ParamValue::AudioParams {
                sample_rate: 48000,
                channels: 2,
                bit_rate: 128_000,
            }),
        }
    }

    fn set_config(&self, config: NodeConfig) -> Result<()> {
        match config {
            NodeConfig::SeekPosition(target_us) => {
                let mut st = self.state.lock().unwrap();
                for idx in 0..2 {
                    let pos = st.samples[idx]
                        .iter()
                        .position(|s| s.pts_us >= target_us)
                        .unwrap_or(st.samples[idx].len());
                    st.cursor[idx] = pos;
                    st.eos_sent[idx] = false;
                }
                Ok(())
            }
        }
    }

    fn codec_header(&self, port: u32) -> Result<Vec<u8>> {
        let st = self.state.lock().unwrap();
        Ok(st.codec_header[port as usize].clone())
    }

    fn allocate_buffer(&self, port: u32, _size: usize) -> Result<BufferId> {
        let mut st = self.state.lock().unwrap();
        let idx = port as usize;
        let slot = st.next_slot[idx];
        st.next_slot[idx] += 1;
        st.outstanding[idx] += 1;
        Ok(BufferId { port, slot })
    }

    fn free_buffer(&self, id: BufferId) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.outstanding[id.port as usize] -= 1;
        Ok(())
    }

    fn fill_buffer(&self, id: BufferId) -> Result<()> {
        if self.state.lock().unwrap().fail_fills {
            return Err(DemuxError::Other("节点暂不接收填充".to_string()));
        }
        self.jobs
            .send(Job::Fill(id))
            .map_err(|_| DemuxError::Other("模拟节点已关闭".to_string()))
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Stop);
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}
