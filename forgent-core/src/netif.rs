//! # Network interfaces
//!
//! Discovery of the host's interfaces, the interactive selection prompt and
//! the raw-socket privilege probe that gates startup.

use crate::error::{self, Error, ErrorKind, Result};
use std::io::{BufRead, Write};
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// One network interface as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    /// Kernel interface index, 0 if unknown
    pub index: u32,
    pub mac: Option<String>,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub is_up: bool,
    pub is_loopback: bool,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 0,
            mac: None,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            is_up: false,
            is_loopback: false,
        }
    }

    fn flags(&self) -> String {
        let mut flags = Vec::new();
        if self.is_up {
            flags.push("UP");
        }
        if self.is_loopback {
            flags.push("LOOPBACK");
        }
        flags.join(",")
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Enumerate interfaces over rtnetlink, ordered by OS index
#[cfg(target_os = "linux")]
pub async fn list_interfaces() -> Result<Vec<NetworkInterface>> {
    use futures_util::TryStreamExt;
    use netlink_packet_route::link::{LinkAttribute, LinkFlag};

    let (connection, handle, _) = rtnetlink::new_connection()
        .map_err(|e| error::interface_query_failed(e.to_string()).set_source(e))?;
    tokio::spawn(connection);

    let mut interfaces = Vec::new();
    let mut links = handle.link().get().execute();

    while let Some(link) = links
        .try_next()
        .await
        .map_err(|e| error::interface_query_failed(e.to_string()))?
    {
        let mut iface = NetworkInterface::new(String::new());
        iface.index = link.header.index;
        iface.is_up = link.header.flags.iter().any(|f| matches!(f, LinkFlag::Up));
        iface.is_loopback = link.header.flags.iter().any(|f| matches!(f, LinkFlag::Loopback));

        for attr in &link.attributes {
            match attr {
                LinkAttribute::IfName(name) => iface.name = name.clone(),
                LinkAttribute::Address(addr) if !addr.is_empty() => {
                    iface.mac = Some(format_mac(addr));
                }
                _ => {}
            }
        }

        if let Err(err) = add_interface_addresses(&handle, &mut iface).await {
            warn!(interface = %iface.name, %err, "failed to read interface addresses");
        }
        interfaces.push(iface);
    }

    interfaces.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.name.cmp(&b.name)));
    debug!(count = interfaces.len(), "enumerated network interfaces");
    Ok(interfaces)
}

#[cfg(target_os = "linux")]
async fn add_interface_addresses(handle: &rtnetlink::Handle, iface: &mut NetworkInterface) -> Result<()> {
    use futures_util::TryStreamExt;
    use netlink_packet_route::address::AddressAttribute;
    use std::net::IpAddr;

    let mut addresses = handle
        .address()
        .get()
        .set_link_index_filter(iface.index)
        .execute();

    while let Some(message) = addresses
        .try_next()
        .await
        .map_err(|e| error::interface_query_failed(e.to_string()))?
    {
        for attr in &message.attributes {
            if let AddressAttribute::Address(addr) = attr {
                match addr {
                    IpAddr::V4(v4) => iface.ipv4.push(*v4),
                    IpAddr::V6(v6) => iface.ipv6.push(*v6),
                }
            }
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub async fn list_interfaces() -> Result<Vec<NetworkInterface>> {
    Err(Error::unsupported("interface discovery is only implemented for linux hosts"))
}

/// Check that the process may open raw IP sockets
#[cfg(unix)]
pub fn probe_raw_socket() -> Result<()> {
    // SAFETY: plain socket(2) call; the descriptor is closed right away
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW) };
    if fd < 0 {
        let err = std::io::Error::last_os_error();
        return Err(error::raw_socket_denied(err.to_string()).set_source(err));
    }
    // SAFETY: fd is a descriptor we own
    unsafe { libc::close(fd) };
    Ok(())
}

#[cfg(not(unix))]
pub fn probe_raw_socket() -> Result<()> {
    Err(Error::unsupported("raw socket probe is only implemented for unix hosts"))
}

/// Format interfaces as a table; the first column is the selection index
pub fn render_interface_table(interfaces: &[NetworkInterface]) -> String {
    let header = ["Index", "Name", "IfIndex", "MAC", "IPv4", "IPv6", "Flags"];
    let rows: Vec<[String; 7]> = interfaces
        .iter()
        .enumerate()
        .map(|(i, iface)| {
            [
                i.to_string(),
                iface.name.clone(),
                iface.index.to_string(),
                iface.mac.clone().unwrap_or_else(|| "-".into()),
                join_or_dash(&iface.ipv4),
                join_or_dash(&iface.ipv6),
                iface.flags(),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let format_row = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    out.push_str(&format_row(header.to_vec()));
    out.push('\n');
    for row in &rows {
        out.push_str(&format_row(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn join_or_dash<T: ToString>(addrs: &[T]) -> String {
    if addrs.is_empty() {
        "-".into()
    } else {
        addrs.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
    }
}

/// Parse a selection index; it must be an integer in `0..count`
pub fn parse_selection(input: &str, count: usize) -> Result<usize> {
    let trimmed = input.trim();
    match trimmed.parse::<usize>() {
        Ok(index) if index < count => Ok(index),
        _ => Err(error::invalid_selection(trimmed)),
    }
}

/// Ask for an interface index until a valid one is entered.
///
/// Invalid input re-prompts without limit. End of input is an error, since
/// nothing more can be read.
pub fn prompt_for_interface<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    interfaces: &[NetworkInterface],
) -> Result<usize> {
    if interfaces.is_empty() {
        return Err(Error::new(ErrorKind::InterfaceNotFound, "no network interfaces available")
            .with_operation("netif::prompt_for_interface"));
    }

    loop {
        write!(output, "Select the interface index: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(error::channel_closed("stdin").with_operation("netif::prompt_for_interface"));
        }

        match parse_selection(&line, interfaces.len()) {
            Ok(index) => {
                debug!(index, name = %interfaces[index].name, "interface selected");
                return Ok(index);
            }
            Err(err) => {
                warn!(%err, "rejected interface selection");
                writeln!(output, "Invalid index. Please try again.")?;
            }
        }
    }
}
