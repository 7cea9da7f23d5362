use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

// Live client endpoints, so a freshly accepted connection can be recognized
// as one of our own outbound sockets before any handshake happens.
static ENDPOINTS: Mutex<Vec<(u64, SocketAddr, SocketAddr)>> = Mutex::new(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn register(local: SocketAddr, remote: SocketAddr) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    ENDPOINTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((id, local, remote));
    id
}

pub(crate) fn deregister(id: u64) {
    ENDPOINTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|(other, _, _)| *other != id);
}

/// A just-opened connection whose local endpoint matches another live
/// client's remote endpoint is this process talking to itself.
pub(crate) fn is_self_loop(local: SocketAddr) -> bool {
    ENDPOINTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .any(|(_, _, remote)| remote.port() == local.port() && remote.ip() == local.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_a_mirrored_endpoint() {
        let local: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let remote: SocketAddr = "127.0.0.1:48879".parse().unwrap();
        let id = register(local, remote);

        // A new connection whose local side mirrors the registered remote.
        let mirrored: SocketAddr = "127.0.0.1:48879".parse().unwrap();
        assert!(is_self_loop(mirrored));

        let other: SocketAddr = "127.0.0.1:48880".parse().unwrap();
        assert!(!is_self_loop(other));
        let other_ip: SocketAddr = "10.0.0.2:48879".parse().unwrap();
        assert!(!is_self_loop(other_ip));

        deregister(id);
        assert!(!is_self_loop(mirrored));
    }
}
