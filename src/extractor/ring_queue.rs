use std::sync::Mutex;

use crate::core::error::{DemuxError, Result};

/// 有界环形队列
///
/// 满 / 空时立即返回错误，从不阻塞；等待由调用方的条件变量负责。
/// 额外多分配一个槽位用于区分「满」和「空」两种 push == pop 的情形。
pub struct RingQueue<T> {
    inner: Mutex<RingInner<T>>,
}

struct RingInner<T> {
    entries: Vec<Option<T>>,
    push: usize,
    pop: usize,
}

impl<T> RingQueue<T> {
    /// 创建最多容纳 `max_entries` 个元素的队列
    pub fn new(max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(DemuxError::InvalidArgument(
                "队列容量必须大于 0".to_string(),
            ));
        }
        let capacity = max_entries + 1;
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Ok(Self {
            inner: Mutex::new(RingInner {
                entries,
                push: 0,
                pop: 0,
            }),
        })
    }

    /// 入队；队列满时返回 NoMemory，且不修改队列
    pub fn enqueue(&self, value: T) -> Result<()> {
        let mut inner = self.lock();
        let capacity = inner.entries.len();
        let next = (inner.push + 1) % capacity;
        if next == inner.pop {
            return Err(DemuxError::NoMemory);
        }
        let slot = inner.push;
        inner.entries[slot] = Some(value);
        inner.push = next;
        Ok(())
    }

    /// 出队；队列空时返回 NotFound
    pub fn dequeue(&self) -> Result<T> {
        let mut inner = self.lock();
        if inner.push == inner.pop {
            return Err(DemuxError::NotFound);
        }
        let slot = inner.pop;
        let value = inner.entries[slot].take();
        inner.pop = (inner.pop + 1) % inner.entries.len();
        match value {
            Some(v) => Ok(v),
            // enqueue 填入后不会被其他路径清空
            None => Err(DemuxError::Other("环形队列槽位为空".to_string())),
        }
    }

    /// 插回队头：下一次 dequeue 先取到该元素
    pub fn insert_head(&self, value: T) -> Result<()> {
        let mut inner = self.lock();
        let capacity = inner.entries.len();
        let new_pop = (inner.pop + capacity - 1) % capacity;
        if new_pop == inner.push {
            return Err(DemuxError::NoMemory);
        }
        inner.entries[new_pop] = Some(value);
        inner.pop = new_pop;
        Ok(())
    }

    /// 当前元素个数
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RingInner<T>> {
        // 持锁期间不会 panic，中毒视为不可达
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Clone> RingQueue<T> {
    /// 查看队头元素，不出队
    pub fn peek(&self) -> Result<T> {
        self.peek_at(0)
    }

    /// 查看从队头起第 `n` 个元素
    pub fn peek_at(&self, n: usize) -> Result<T> {
        let inner = self.lock();
        if inner.push == inner.pop {
            return Err(DemuxError::NotFound);
        }
        if n >= inner.count() {
            return Err(DemuxError::InvalidArgument(format!(
                "peek 下标 {} 超出队列长度 {}",
                n,
                inner.count()
            )));
        }
        let slot = (inner.pop + n) % inner.entries.len();
        match &inner.entries[slot] {
            Some(v) => Ok(v.clone()),
            None => Err(DemuxError::Other("环形队列槽位为空".to_string())),
        }
    }
}

impl<T> RingInner<T> {
    fn count(&self) -> usize {
        let capacity = self.entries.len();
        if self.push >= self.pop {
            self.push - self.pop
        } else {
            capacity - self.pop + self.push
        }
    }
}
