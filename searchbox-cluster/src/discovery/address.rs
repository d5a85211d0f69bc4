//! Parsing of node addresses advertised by the nodes info API
//!
//! Accepted forms:
//! - `inet[hostname/ip:port]`
//! - `inet[/ip:port]`
//! - `inet[ip:port]`
//!
//! The hostname, when present, is dropped in favor of the IP literal.

const INET_PREFIX: &str = "inet[";
const INET_SUFFIX: char = ']';

/// Convert a raw node address into `<scheme>://<ip>:<port>`.
///
/// Returns `None` when the wrapper is missing, the host is empty or the
/// port is not a non-empty run of digits.
#[must_use]
pub fn parse_node_address(raw: &str, scheme: &str) -> Option<String> {
    let inner = raw.strip_prefix(INET_PREFIX)?.strip_suffix(INET_SUFFIX)?;

    let host_port = inner.split_once('/').map_or(inner, |(_hostname, rest)| rest);
    let (host, port) = host_port.rsplit_once(':')?;

    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(format!("{scheme}://{host}:{port}"))
}
