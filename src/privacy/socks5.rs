//! Minimal SOCKS5 client (RFC 1928, no authentication, CONNECT only).

use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// SOCKS protocol version 5
pub const VERSION: u8 = 0x05;

/// Authentication methods
pub mod auth {
    /// No authentication required
    pub const NO_AUTH: u8 = 0x00;
    /// No acceptable methods
    pub const NO_ACCEPTABLE: u8 = 0xFF;
}

/// Commands
pub mod command {
    /// Establish a TCP stream
    pub const CONNECT: u8 = 0x01;
}

/// Address types for SOCKS5 requests
pub mod addr_type {
    /// IPv4 address (4 bytes)
    pub const IPV4: u8 = 0x01;
    /// Domain name (1 byte length + name)
    pub const DOMAIN: u8 = 0x03;
    /// IPv6 address (16 bytes)
    pub const IPV6: u8 = 0x04;
}

/// Reply codes from SOCKS5 server
pub mod reply {
    /// Request succeeded
    pub const SUCCESS: u8 = 0x00;
    /// Reserved byte (always 0x00)
    pub const RESERVED: u8 = 0x00;
    /// Connection refused by destination host
    pub const CONNECTION_REFUSED: u8 = 0x05;
}

/// Human-readable text for a SOCKS5 reply code.
pub fn reply_message(code: u8) -> &'static str {
    match code {
        0x00 => "succeeded",
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS error",
    }
}

/// Encode a CONNECT request for `host:port`.
///
/// IP literals are sent as addresses; anything else is sent as a domain
/// name so resolution happens on the far side of the proxy.
pub fn encode_connect(host: &str, port: u16) -> io::Result<Vec<u8>> {
    let mut request = vec![VERSION, command::CONNECT, reply::RESERVED];
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(addr_type::IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(addr_type::IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            if name.is_empty() || name.len() > u8::MAX as usize {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid SOCKS5 domain name length: {}", name.len()),
                ));
            }
            request.push(addr_type::DOMAIN);
            request.push(name.len() as u8);
            request.extend_from_slice(name);
        }
    }

    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

fn protocol_error(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Open a stream to `host:port` through the SOCKS5 proxy at `proxy`.
pub async fn connect(proxy: SocketAddr, host: &str, port: u16) -> io::Result<TcpStream> {
    let request = encode_connect(host, port)?;
    let mut stream = TcpStream::connect(proxy).await?;

    // Greeting: offer no-auth only
    stream.write_all(&[VERSION, 1, auth::NO_AUTH]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(protocol_error(format!(
            "unexpected SOCKS version {:#04x}",
            choice[0]
        )));
    }
    if choice[1] != auth::NO_AUTH {
        return Err(protocol_error("proxy requires authentication"));
    }

    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(protocol_error(format!(
            "unexpected SOCKS version {:#04x}",
            head[0]
        )));
    }
    if head[1] != reply::SUCCESS {
        let kind = if head[1] == reply::CONNECTION_REFUSED {
            io::ErrorKind::ConnectionRefused
        } else {
            io::ErrorKind::Other
        };
        return Err(io::Error::new(kind, reply_message(head[1])));
    }

    // Discard the bound address
    let remaining = match head[3] {
        addr_type::IPV4 => 4 + 2,
        addr_type::IPV6 => 16 + 2,
        addr_type::DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize + 2
        }
        other => {
            return Err(protocol_error(format!(
                "unknown bound address type {:#04x}",
                other
            )))
        }
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;

    Ok(stream)
}
