//! CPU temperature from the Linux thermal sysfs interface.

use std::io;
use std::path::Path;

/// Thermal zone of the SoC on most single-board computers.
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Read a thermal zone file and return degrees Celsius.
pub fn read_temperature(path: &Path) -> io::Result<f64> {
    let content = std::fs::read_to_string(path)?;
    parse_millidegrees(&content)
}

/// Parse a millidegree reading (e.g. `"48312\n"`).
pub fn parse_millidegrees(content: &str) -> io::Result<f64> {
    let milli: i64 = content
        .trim()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(milli as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("48312\n").unwrap(), 48.312);
        assert_eq!(parse_millidegrees("-5000").unwrap(), -5.0);
        assert!(parse_millidegrees("hot").is_err());
    }

    #[test]
    fn test_read_temperature_file() {
        let path = std::env::temp_dir().join(format!("plgate-temp-{}", std::process::id()));
        std::fs::write(&path, "51000\n").unwrap();
        assert_eq!(read_temperature(&path).unwrap(), 51.0);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let result = read_temperature(Path::new("/nonexistent/thermal_zone/temp"));
        assert!(result.is_err());
    }
}
