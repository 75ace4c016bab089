use crate::HostId;

const HUB_SERVER: &str = "HOSTPULSE_SERVER";

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

pub fn get_server_url() -> String {
    std::env::var(HUB_SERVER).unwrap_or_else(|_| DEFAULT_SERVER.to_string())
}

const AGENT_SECRET: &str = "HOSTPULSE_SECRET";

pub fn get_secret() -> Option<String> {
    let secret_from_env = std::env::var(AGENT_SECRET);
    secret_from_env.ok()
}

const AGENT_HOST_ID: &str = "HOSTPULSE_HOST_ID";

pub fn get_host_id() -> Option<HostId> {
    let id_from_env = std::env::var(AGENT_HOST_ID);
    id_from_env.ok().and_then(|res| res.parse().ok())
}

/// Render a byte count with binary units, e.g. `1.50 GiB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.50 GiB");
    }
}
