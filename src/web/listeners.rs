use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// Binds the HTTP listener. `*` means every interface.
pub async fn create_listener(
    host: &str,
    port: u16,
) -> std::io::Result<(String, tokio::net::TcpListener)> {
    if host == "*" {
        return create_wildcard_listener(port);
    }

    let addr = format!("{}:{}", host, port);
    tracing::info!("Attempting to bind server to {}...", addr);

    let tokio_listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = tokio_listener.local_addr()?;

    Ok((local_addr.to_string(), tokio_listener))
}

fn create_ipv6_dual_stack_wildcard_listener(
    port: u16,
) -> std::io::Result<(String, tokio::net::TcpListener)> {
    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));

    tracing::info!(
        "Attempting to bind server to {}... (IPv6 + IPv4 dual-stack)",
        addr
    );

    // Fails if IPv6 is not supported
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;

    if let Err(e) = socket.set_only_v6(false) {
        tracing::warn!(
            "Failed to set dual-stack mode for IPv6 socket: {}. Continuing anyway.",
            e
        );
    }

    bind_socket(socket, addr)
}

fn create_wildcard_listener(port: u16) -> std::io::Result<(String, tokio::net::TcpListener)> {
    // Dual-stack IPv6 covers IPv4 too where the OS allows it
    let ipv6_listener = create_ipv6_dual_stack_wildcard_listener(port);
    if ipv6_listener.is_ok() {
        return ipv6_listener;
    }

    tracing::warn!("Failed to bind IPv6 listener. Attempting IPv4 only.");

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tracing::info!("Attempting to bind server to {}... (IPv4)", addr);

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    bind_socket(socket, addr)
}

fn bind_socket(
    socket: Socket,
    addr: SocketAddr,
) -> std::io::Result<(String, tokio::net::TcpListener)> {
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    // Make it non-blocking for tokio
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    let tokio_listener = tokio::net::TcpListener::from_std(std_listener)?;
    let local_addr = tokio_listener.local_addr()?;

    Ok((local_addr.to_string(), tokio_listener))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_named_host_on_ephemeral_port() {
        let (addr, listener) = create_listener("127.0.0.1", 0).await.unwrap();

        let local = listener.local_addr().unwrap();
        assert_ne!(local.port(), 0);
        assert_eq!(addr, local.to_string());
    }

    #[tokio::test]
    async fn test_bind_wildcard_on_ephemeral_port() {
        let (_, listener) = create_listener("*", 0).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_bind_port_in_use_fails() {
        let (_, held) = create_listener("127.0.0.1", 0).await.unwrap();
        let port = held.local_addr().unwrap().port();

        assert!(create_listener("127.0.0.1", port).await.is_err());
    }
}
