use anyhow::Context;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

// ── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct IpRange<T> {
    start: T,
    end: T,
    country: String,
}

/// Offline IP → country table, loaded once at startup from a
/// `start_ip,end_ip,country` CSV (the db-ip "country lite" layout).
///
/// Never mutated after construction, so it is shared as `Arc<CountryTable>`
/// without any locking.
#[derive(Debug, Default)]
pub struct CountryTable {
    v4: Vec<IpRange<u32>>,
    v6: Vec<IpRange<u128>>,
}

impl CountryTable {
    /// A table with no ranges; every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open IP country database {}", path.display()))?;
        let table = Self::from_reader(file)?;

        tracing::info!(
            "Loaded {} IPv4 and {} IPv6 country range(s) from {}",
            table.v4.len(),
            table.v6.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::default();
        let mut skipped = 0usize;

        for record in rdr.records() {
            let record = record.context("malformed IP country CSV")?;
            let (Some(start), Some(end), Some(country)) =
                (record.get(0), record.get(1), record.get(2))
            else {
                skipped += 1;
                continue;
            };

            if country.is_empty() {
                skipped += 1;
                continue;
            }

            match (IpAddr::from_str(start), IpAddr::from_str(end)) {
                (Ok(IpAddr::V4(s)), Ok(IpAddr::V4(e))) if s <= e => table.v4.push(IpRange {
                    start: u32::from(s),
                    end: u32::from(e),
                    country: country.to_owned(),
                }),
                (Ok(IpAddr::V6(s)), Ok(IpAddr::V6(e))) if s <= e => table.v6.push(IpRange {
                    start: u128::from(s),
                    end: u128::from(e),
                    country: country.to_owned(),
                }),
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!("Skipped {} unusable row(s) in IP country database", skipped);
        }

        table.v4.sort_by_key(|r| r.start);
        table.v6.sort_by_key(|r| r.start);
        Ok(table)
    }

    /// Country code for `ip`, or `None` for private, unparseable or
    /// uncovered addresses.
    pub fn lookup(&self, ip: &str) -> Option<&str> {
        if is_private(ip) {
            return None;
        }

        let ip = ip.strip_prefix("::ffff:").unwrap_or(ip);
        match IpAddr::from_str(ip).ok()? {
            IpAddr::V4(addr) => find(&self.v4, u32::from(addr)),
            IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
                Some(v4) => find(&self.v4, u32::from(v4)),
                None => find(&self.v6, u128::from(addr)),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

fn find<T: Ord + Copy>(ranges: &[IpRange<T>], ip: T) -> Option<&str> {
    let idx = ranges.partition_point(|r| r.start <= ip);
    let candidate = ranges.get(idx.checked_sub(1)?)?;
    (ip <= candidate.end).then_some(candidate.country.as_str())
}

/// Return `true` for addresses that can never be geolocated: loopback,
/// link-local, private ranges, and IPv6 special addresses.
fn is_private(ip_str: &str) -> bool {
    // Strip IPv6-mapped IPv4 prefix: "::ffff:1.2.3.4" → "1.2.3.4"
    let ip_str = ip_str.strip_prefix("::ffff:").unwrap_or(ip_str);

    match IpAddr::from_str(ip_str) {
        Ok(IpAddr::V4(addr)) => {
            addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast()
                || addr.is_private()
        }
        Ok(IpAddr::V6(addr)) => {
            addr.is_loopback()       // ::1
            || addr.is_unspecified() // ::
            // fe80::/10  link-local
            || (addr.segments()[0] & 0xffc0) == 0xfe80
            // fc00::/7   unique-local
            || (addr.segments()[0] & 0xfe00) == 0xfc00
        }
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
1.0.0.0,1.0.0.255,AU
8.8.8.0,8.8.8.255,US
2001:4860::,2001:4860:ffff:ffff:ffff:ffff:ffff:ffff,US
2a00:1450::,2a00:1450:ffff:ffff:ffff:ffff:ffff:ffff,IE
81.2.69.0,81.2.69.255,GB
not-an-ip,1.2.3.4,ZZ
";

    fn table() -> CountryTable {
        CountryTable::from_reader(SAMPLE.as_bytes()).unwrap()
    }

    #[test]
    fn finds_v4_ranges_regardless_of_file_order() {
        let t = table();
        assert_eq!(t.lookup("8.8.8.8"), Some("US"));
        assert_eq!(t.lookup("1.0.0.0"), Some("AU"));
        assert_eq!(t.lookup("1.0.0.255"), Some("AU"));
        assert_eq!(t.lookup("81.2.69.160"), Some("GB"));
    }

    #[test]
    fn misses_gaps_and_private_addresses() {
        let t = table();
        assert_eq!(t.lookup("1.0.1.0"), None);
        assert_eq!(t.lookup("0.255.255.255"), None);
        assert_eq!(t.lookup("127.0.0.1"), None);
        assert_eq!(t.lookup("192.168.1.20"), None);
        assert_eq!(t.lookup("garbage"), None);
    }

    #[test]
    fn finds_v6_and_mapped_v4() {
        let t = table();
        assert_eq!(t.lookup("2001:4860:4860::8888"), Some("US"));
        assert_eq!(t.lookup("2a00:1450:4001::1"), Some("IE"));
        assert_eq!(t.lookup("::ffff:8.8.4.4"), None);
        assert_eq!(t.lookup("::ffff:8.8.8.4"), Some("US"));
        assert_eq!(t.lookup("::1"), None);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let t = CountryTable::load(file.path()).unwrap();
        assert!(!t.is_empty());
        assert_eq!(t.lookup("8.8.8.8"), Some("US"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(CountryTable::load("/definitely/not/here.csv").is_err());
    }

    #[test]
    fn empty_table_always_misses() {
        let t = CountryTable::empty();
        assert!(t.is_empty());
        assert_eq!(t.lookup("8.8.8.8"), None);
    }
}
