use std::ffi::{CStr, CString};
use std::net::SocketAddr;

use socket2::SockAddr;
use thiserror::Error;

// Large enough for any numeric IPv6 address including a scope suffix.
const NUMERIC_HOST_LEN: usize = 1025;

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Host name {0:?} contains an interior NUL byte")]
    InvalidHost(String),
    #[error("Failed to get addr info for {host}: {message} (code {code})")]
    Lookup {
        host: String,
        code: i32,
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    IPv4,
    IPv6,
}

/// One connectable candidate produced by [`resolve`].
///
/// `ip_string` is the numeric form reported by the resolver (no reverse
/// lookup), which may carry a scope suffix for link-local IPv6 addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip_string: String,
    pub addr: SocketAddr,
}

impl ResolvedAddress {
    pub fn family(&self) -> Family {
        match self.addr {
            SocketAddr::V4(_) => Family::IPv4,
            SocketAddr::V6(_) => Family::IPv6,
        }
    }

    pub fn sock_addr(&self) -> SockAddr {
        SockAddr::from(self.addr)
    }
}

struct AddrInfoList(*mut libc::addrinfo);

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

/// Resolves `host` into every stream/TCP address the system resolver
/// returns, restricted to address families configured on a local
/// interface. Records that are neither IPv4 nor IPv6, or whose numeric
/// form cannot be produced, are skipped. Resolver order is preserved.
pub fn resolve(host: &str, port: u16) -> Result<Vec<ResolvedAddress>, ResolveError> {
    let c_host = CString::new(host).map_err(|_| ResolveError::InvalidHost(host.to_string()))?;
    let c_port = CString::new(port.to_string())
        .map_err(|_| ResolveError::InvalidHost(host.to_string()))?;

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_flags = libc::AI_ADDRCONFIG;
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_protocol = libc::IPPROTO_TCP;

    let mut res: *mut libc::addrinfo = std::ptr::null_mut();
    let code = unsafe { libc::getaddrinfo(c_host.as_ptr(), c_port.as_ptr(), &hints, &mut res) };
    let list = AddrInfoList(res);
    if code != 0 || list.0.is_null() {
        let message = unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
            .to_string_lossy()
            .into_owned();
        return Err(ResolveError::Lookup {
            host: host.to_string(),
            code,
            message,
        });
    }

    let mut resolved = Vec::new();
    let mut cursor = list.0;
    while !cursor.is_null() {
        let ai = unsafe { &*cursor };
        cursor = ai.ai_next;
        if let Some(entry) = unsafe { convert_record(ai) } {
            resolved.push(entry);
        }
    }
    log::trace!("Resolved {}:{} to {:?}", host, port, resolved);
    Ok(resolved)
}

unsafe fn convert_record(ai: &libc::addrinfo) -> Option<ResolvedAddress> {
    if ai.ai_addr.is_null() {
        return None;
    }
    if ai.ai_family != libc::AF_INET && ai.ai_family != libc::AF_INET6 {
        log::trace!("Skipping address record of family {}", ai.ai_family);
        return None;
    }

    let mut host_buf = [0 as libc::c_char; NUMERIC_HOST_LEN];
    let err = libc::getnameinfo(
        ai.ai_addr,
        ai.ai_addrlen,
        host_buf.as_mut_ptr(),
        host_buf.len() as _,
        std::ptr::null_mut(),
        0,
        libc::NI_NUMERICHOST,
    );
    if err != 0 {
        log::trace!("getnameinfo failed with code {}, skipping record", err);
        return None;
    }
    let ip_string = CStr::from_ptr(host_buf.as_ptr())
        .to_string_lossy()
        .into_owned();

    let addr_len = ai.ai_addrlen;
    if addr_len as usize > std::mem::size_of::<libc::sockaddr_storage>() {
        return None;
    }
    let src = ai.ai_addr as *const u8;
    let (_, sock_addr) = SockAddr::try_init(|storage, len| {
        std::ptr::copy_nonoverlapping(src, storage as *mut u8, addr_len as usize);
        *len = addr_len;
        Ok(())
    })
    .ok()?;
    let addr = sock_addr.as_socket()?;
    Some(ResolvedAddress { ip_string, addr })
}
