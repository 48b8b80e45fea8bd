use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// 一次非阻塞读的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRead {
    /// 读到 n 字节
    Data(usize),
    /// 暂无数据，稍后重试
    WouldBlock,
    /// 流中出现不连续点
    Discontinuity { format_change: bool },
    /// 流结束（粘性）
    EndOfStream,
}

/// 非阻塞字节源
pub trait StreamListener: Send {
    fn read(&mut self, buf: &mut [u8]) -> ListenerRead;
}

/// 投递给监听器的数据块
pub enum StreamChunk {
    Data(Vec<u8>),
    Discontinuity { format_change: bool },
    End,
}

/// 基于 crossbeam 通道的监听器实现。
/// 未读完的块保留在 pending 中，跨多次 read 续读。
pub struct ChannelStreamListener {
    rx: Receiver<StreamChunk>,
    pending: Vec<u8>,
    pending_offset: usize,
    ended: bool,
}

impl ChannelStreamListener {
    fn copy_pending(&mut self, buf: &mut [u8]) -> usize {
        let available = self.pending.len() - self.pending_offset;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + n]);
        self.pending_offset += n;
        if self.pending_offset >= self.pending.len() {
            self.pending.clear();
            self.pending_offset = 0;
        }
        n
    }
}

impl StreamListener for ChannelStreamListener {
    fn read(&mut self, buf: &mut [u8]) -> ListenerRead {
        if self.ended {
            return ListenerRead::EndOfStream;
        }
        if buf.is_empty() {
            return ListenerRead::Data(0);
        }
        if self.pending_offset < self.pending.len() {
            return ListenerRead::Data(self.copy_pending(buf));
        }
        match self.rx.try_recv() {
            Ok(StreamChunk::Data(data)) => {
                if data.is_empty() {
                    return ListenerRead::WouldBlock;
                }
                self.pending = data;
                self.pending_offset = 0;
                ListenerRead::Data(self.copy_pending(buf))
            }
            Ok(StreamChunk::Discontinuity { format_change }) => {
                ListenerRead::Discontinuity { format_change }
            }
            Ok(StreamChunk::End) => {
                self.ended = true;
                ListenerRead::EndOfStream
            }
            Err(TryRecvError::Empty) => ListenerRead::WouldBlock,
            Err(TryRecvError::Disconnected) => {
                self.ended = true;
                ListenerRead::EndOfStream
            }
        }
    }
}

/// 生产端句柄
#[derive(Clone)]
pub struct StreamFeeder {
    tx: Sender<StreamChunk>,
}

impl StreamFeeder {
    pub fn feed(&self, data: Vec<u8>) {
        let _ = self.tx.send(StreamChunk::Data(data));
    }

    pub fn discontinuity(&self, format_change: bool) {
        let _ = self.tx.send(StreamChunk::Discontinuity { format_change });
    }

    pub fn end(&self) {
        let _ = self.tx.send(StreamChunk::End);
    }
}

/// 建一对（生产端，监听器）
pub fn channel_listener() -> (StreamFeeder, ChannelStreamListener) {
    let (tx, rx) = unbounded();
    (
        StreamFeeder { tx },
        ChannelStreamListener {
            rx,
            pending: Vec::new(),
            pending_offset: 0,
            ended: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_when_empty() {
        let (_feeder, mut listener) = channel_listener();
        let mut buf = [0u8; 8];
        assert_eq!(listener.read(&mut buf), ListenerRead::WouldBlock);
    }

    #[test]
    fn test_partial_chunk_carry_over() {
        let (feeder, mut listener) = channel_listener();
        feeder.feed(vec![1, 2, 3, 4, 5]);

        let mut buf = [0u8; 3];
        assert_eq!(listener.read(&mut buf), ListenerRead::Data(3));
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(listener.read(&mut buf), ListenerRead::Data(2));
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(listener.read(&mut buf), ListenerRead::WouldBlock);
    }

    #[test]
    fn test_discontinuity_and_sticky_end() {
        let (feeder, mut listener) = channel_listener();
        feeder.discontinuity(true);
        feeder.end();
        feeder.feed(vec![9]);

        let mut buf = [0u8; 4];
        assert_eq!(
            listener.read(&mut buf),
            ListenerRead::Discontinuity {
                format_change: true
            }
        );
        assert_eq!(listener.read(&mut buf), ListenerRead::EndOfStream);
        // End 之后的数据不再可见
        assert_eq!(listener.read(&mut buf), ListenerRead::EndOfStream);
    }

    #[test]
    fn test_end_on_feeder_drop() {
        let (feeder, mut listener) = channel_listener();
        drop(feeder);
        let mut buf = [0u8; 4];
        assert_eq!(listener.read(&mut buf), ListenerRead::EndOfStream);
    }
}
