use bytes::BytesMut;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Pool of encode buffers for outgoing datagrams, each with the capacity of one maximum-size
///  datagram
pub struct DatagramBufferPool {
    buf_size: usize,
    max_pooled: usize,
    buffers: Mutex<Vec<BytesMut>>,
}

impl DatagramBufferPool {
    pub fn new(buf_size: usize, max_pooled: usize) -> Self {
        DatagramBufferPool {
            buf_size,
            max_pooled,
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
        }
    }

    pub fn get_from_pool(&self) -> BytesMut {
        let pooled = self.buffers.lock().unwrap().pop();
        pooled.unwrap_or_else(|| {
            debug!("datagram buffer pool is empty - allocating {} bytes", self.buf_size);
            BytesMut::with_capacity(self.buf_size)
        })
    }

    pub fn return_to_pool(&self, mut buffer: BytesMut) {
        if buffer.capacity() < self.buf_size {
            // the buffer's storage was handed off, it cannot hold a full datagram any more
            debug!("returned buffer has shrunk to {} bytes - discarding", buffer.capacity());
            return;
        }
        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.len() < self.max_pooled {
            trace!("datagram buffer back in pool");
            buffers.push(buffer);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}
