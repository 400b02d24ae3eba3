//! 接收缓冲区的有界空闲列表。
//! A bounded free-list of receive buffers.

use bytes::BytesMut;
use std::collections::VecDeque;

/// Recycles receive buffers of a fixed default size.
///
/// Every socket read goes through a buffer of `buffer_size` bytes; instead
/// of allocating one per datagram, the pool keeps up to `max_cached`
/// returned buffers and hands them out again. Buffers beyond the bound are
/// simply dropped.
///
/// 回收固定默认大小的接收缓冲区。
///
/// 每次套接字读取都使用一个 `buffer_size` 字节的缓冲区；缓冲池最多缓存
/// `max_cached` 个归还的缓冲区以供复用，而不是每个数据报都分配一次。
/// 超出上限的缓冲区直接丢弃。
#[derive(Debug)]
pub struct BufferPool {
    free: VecDeque<BytesMut>,
    buffer_size: usize,
    max_cached: usize,
}

impl BufferPool {
    /// Creates a pool handing out buffers of `buffer_size` bytes and
    /// caching at most `max_cached` of them.
    /// 创建一个缓冲池，分发 `buffer_size` 字节的缓冲区，最多缓存
    /// `max_cached` 个。
    pub fn new(buffer_size: usize, max_cached: usize) -> Self {
        Self {
            free: VecDeque::new(),
            buffer_size,
            max_cached,
        }
    }

    /// Takes a cleared buffer of the default size, reusing a cached one
    /// when available.
    /// 取出一个清空的默认大小缓冲区，优先复用缓存。
    pub fn acquire(&mut self) -> BytesMut {
        match self.free.pop_front() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(self.buffer_size, 0);
                buf
            }
            None => BytesMut::zeroed(self.buffer_size),
        }
    }

    /// Returns a buffer to the pool. Buffers whose capacity no longer
    /// matches the default size are dropped, as is anything past the
    /// cache bound.
    /// 将缓冲区归还缓冲池。容量不再匹配默认大小的缓冲区会被丢弃，超出
    /// 缓存上限的同样丢弃。
    pub fn release(&mut self, buf: BytesMut) {
        if buf.capacity() >= self.buffer_size && self.free.len() < self.max_cached {
            self.free.push_back(buf);
        }
    }

    /// Number of currently cached buffers.
    pub fn cached(&self) -> usize {
        self.free.len()
    }
}
