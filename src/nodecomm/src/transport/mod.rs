pub mod frame;

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

/// Listening side of the coordinator role.
pub struct Server {
    listener: TcpListener,
    expected_workers: usize,
    nodelay: bool,
}

impl Server {
    pub(crate) fn new(listener: TcpListener, expected_workers: usize, nodelay: bool) -> Self {
        Server {
            listener,
            expected_workers,
            nodelay,
        }
    }

    pub fn expected_workers(&self) -> usize {
        self.expected_workers
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn accept(&self) -> Option<Client> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if self.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                }
                log::debug!("Accepted worker connection from {}", peer);
                Some(Client::from_stream(stream))
            }
            Err(e) => {
                log::warn!("Coordinator accept failed: {}", e);
                None
            }
        }
    }

    /// Accepts until every expected worker has connected or an accept
    /// fails, whichever comes first.
    pub fn accept_all(&self) -> Vec<Client> {
        let mut clients = Vec::with_capacity(self.expected_workers);
        while clients.len() < self.expected_workers {
            match self.accept() {
                Some(client) => clients.push(client),
                None => break,
            }
        }
        log::trace!(
            "Coordinator accepted {} of {} workers",
            clients.len(),
            self.expected_workers
        );
        clients
    }

    pub fn close(self) {
        std::mem::drop(self.listener);
    }
}

/// One framed connection. `send` and `receive` exchange whole messages,
/// `write_bytes` and `read_into` give raw access to the stream.
pub struct Client<S = TcpStream> {
    stream: S,
}

impl<S: Read + Write> Client<S> {
    pub fn from_stream(stream: S) -> Self {
        Client { stream }
    }

    pub fn send(&mut self, message: &[u8]) -> bool {
        match frame::send_message(&mut self.stream, message) {
            Ok(()) => true,
            Err(e) => {
                log::trace!("Failed to send {} byte message: {}", message.len(), e);
                false
            }
        }
    }

    /// Returns the next message, or an empty buffer once the connection
    /// is closed or broken.
    pub fn receive(&mut self) -> Vec<u8> {
        match frame::recv_message(&mut self.stream) {
            Ok(message) => message,
            Err(e) => {
                log::trace!("Failed to receive message: {}", e);
                Vec::new()
            }
        }
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    // With `fill` set, keeps reading until `buf` is full or the stream ends.
    pub fn read_into(&mut self, buf: &mut [u8], fill: bool) -> io::Result<usize> {
        if !fill {
            return self.stream.read(buf);
        }
        let mut offset = 0;
        while offset < buf.len() {
            match self.stream.read(&mut buf[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(offset)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl Client<TcpStream> {
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn close(self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::trace!("Shutdown on close failed: {}", e);
        }
    }
}
