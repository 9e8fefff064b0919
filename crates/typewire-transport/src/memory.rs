use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::traits::Device;

/// In-memory [`Device`].
///
/// [`MemoryDevice::pair`] builds two connected endpoints (a null-modem cable);
/// [`MemoryDevice::from_bytes`] builds a read-only source that reports end of
/// stream once drained. Closing either end of a pair wakes blocked readers on
/// both ends.
pub struct MemoryDevice {
    rx: Arc<Channel>,
    tx: Option<Arc<Channel>>,
    open: AtomicBool,
    name: String,
}

#[derive(Default)]
struct Channel {
    state: Mutex<ChannelState>,
    ready: Condvar,
}

#[derive(Default)]
struct ChannelState {
    bytes: VecDeque<u8>,
    closed: bool,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

impl MemoryDevice {
    /// Two connected endpoints: bytes written on one are read on the other.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Channel::default());
        let b_to_a = Arc::new(Channel::default());
        let a = Self {
            rx: Arc::clone(&b_to_a),
            tx: Some(Arc::clone(&a_to_b)),
            open: AtomicBool::new(true),
            name: "memory-a".to_string(),
        };
        let b = Self {
            rx: a_to_b,
            tx: Some(b_to_a),
            open: AtomicBool::new(true),
            name: "memory-b".to_string(),
        };
        (a, b)
    }

    /// A read-only source holding `bytes`; reads return end of stream once
    /// everything has been consumed.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let channel = Channel::default();
        {
            let mut state = channel.lock();
            state.bytes.extend(bytes.into());
            state.closed = true;
        }
        Self {
            rx: Arc::new(channel),
            tx: None,
            open: AtomicBool::new(true),
            name: "memory-source".to_string(),
        }
    }

    /// Inject bytes into this endpoint's receive side, as if the peer had
    /// written them.
    pub fn inject(&self, bytes: &[u8]) {
        self.rx.lock().bytes.extend(bytes.iter().copied());
        self.rx.ready.notify_all();
    }

    /// Remove and return every byte currently waiting on the receive side.
    pub fn take_pending(&self) -> Vec<u8> {
        self.rx.lock().bytes.drain(..).collect()
    }

    /// Number of bytes waiting on the receive side.
    pub fn pending_len(&self) -> usize {
        self.rx.lock().bytes.len()
    }
}

impl Device for MemoryDevice {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.rx.lock();
        loop {
            if !state.bytes.is_empty() {
                let n = buf.len().min(state.bytes.len());
                for (slot, byte) in buf.iter_mut().zip(state.bytes.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.closed || !self.is_open() {
                return Ok(0);
            }
            state = self
                .rx
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let Some(tx) = &self.tx else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "memory source is read-only",
            ));
        };
        if !self.is_open() {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        }
        let mut state = tx.lock();
        if state.closed {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        }
        state.bytes.extend(buf.iter().copied());
        drop(state);
        tx.ready.notify_all();
        Ok(buf.len())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.rx.close();
        if let Some(tx) = &self.tx {
            tx.close();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn pair_moves_bytes_both_ways() {
        let (a, b) = MemoryDevice::pair();

        a.write(b"ping").unwrap();
        b.write(b"pong").unwrap();

        let mut buf = [0u8; 8];
        let n = b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn short_reads_preserve_order() {
        let (a, b) = MemoryDevice::pair();
        a.write(&[1, 2, 3, 4, 5]).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(b.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(b.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [3, 4]);
        assert_eq!(b.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn source_reports_eof_when_drained() {
        let source = MemoryDevice::from_bytes(vec![9, 8]);
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert!(source.write(b"x").is_err());
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let (a, b) = MemoryDevice::pair();
        let b = Arc::new(b);

        let reader = {
            let b = Arc::clone(&b);
            thread::spawn(move || {
                let mut buf = [0u8; 1];
                b.read(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(20));
        a.close();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
        assert!(b.write(b"late").is_err());
    }

    #[test]
    fn inject_and_take_pending() {
        let (a, b) = MemoryDevice::pair();
        a.write(b"abc").unwrap();
        assert_eq!(b.pending_len(), 3);
        assert_eq!(b.take_pending(), b"abc".to_vec());

        b.inject(b"zz");
        let mut buf = [0u8; 2];
        assert_eq!(b.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"zz");
    }
}
