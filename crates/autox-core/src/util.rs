use url::{Host, Url};

/// Concurrency partition for a URL: its registrable domain.
///
/// `https://blog.example.co.uk/a` → `example.co.uk`. IP hosts and hosts
/// without a known public suffix use the bare host. Unparsable URLs are
/// their own partition.
pub fn partition_key(url_str: &str) -> String {
    let Ok(url) = Url::parse(url_str) else {
        return url_str.to_string();
    };
    match url.host() {
        Some(Host::Domain(host)) => {
            let host = host.trim_end_matches('.');
            psl::domain_str(host).unwrap_or(host).to_ascii_lowercase()
        }
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        None => url_str.to_string(),
    }
}
