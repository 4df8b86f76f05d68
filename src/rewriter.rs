/* src/rewriter.rs */

use http::{HeaderMap, HeaderValue};

use crate::resolver::{Resolution, X_FORWARDED_FOR, X_IS_TRUSTED, X_REAL_IP};

/// Stamp a resolution onto the outbound headers.
///
/// Sets `X-Is-Trusted` to `yes`/`no` and overwrites `X-Real-IP` with the
/// resolved IP. For trusted peers the resolved IP becomes the front of
/// `X-Forwarded-For`; for untrusted peers the client-supplied chain is
/// replaced by the source IP.
pub fn rewrite_headers(headers: &mut HeaderMap, resolution: &Resolution) {
    let trusted = if resolution.trusted { "yes" } else { "no" };
    headers.insert(X_IS_TRUSTED, HeaderValue::from_static(trusted));

    let client_ip = resolution.client_ip.to_string();
    headers.insert(X_REAL_IP, header_value(&client_ip));
    tracing::debug!(header = "X-Real-IP", value = %client_ip, "Setting header");

    let chain = if resolution.trusted {
        let previous = headers.get(X_FORWARDED_FOR).and_then(|value| match value.to_str() {
            Ok(previous) => Some(previous),
            Err(_) => {
                tracing::debug!("Dropping non-text X-Forwarded-For value");
                None
            }
        });
        prepend_chain(previous, &client_ip)
    } else {
        resolution.source_ip.to_string()
    };

    headers.insert(X_FORWARDED_FOR, header_value(&chain));
    tracing::debug!(header = "X-Forwarded-For", value = %chain, "Setting header");
}

/// Put `client_ip` in front of a comma-separated chain.
///
/// Entries are trimmed, blanks are dropped and entries equal to `client_ip`
/// are elided; the rest keep their relative order.
pub fn prepend_chain(previous: Option<&str>, client_ip: &str) -> String {
    let Some(previous) = previous.filter(|chain| !chain.is_empty()) else {
        return client_ip.to_string();
    };

    std::iter::once(client_ip)
        .chain(
            previous
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty() && *entry != client_ip),
        )
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values are IP literals or entries of a chain that already passed
/// `HeaderValue::to_str`, so encoding cannot fail.
fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
