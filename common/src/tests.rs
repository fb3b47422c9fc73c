use super::*;
use pretty_assertions::assert_eq;
use std::io::Write;
use test_case::test_case;

#[test]
fn defaults_match_the_board_firmware() {
    let config = Config::default();
    assert_eq!(config.serial.baud_rate, 9600);
    assert_eq!(config.serial.data_bits, 8);
    assert_eq!(config.serial.stop_bits, StopBits::One);
    assert_eq!(config.serial.parity, Parity::None);
    assert_eq!(config.timing.response_timeout(), Duration::from_secs(5));
    assert_eq!(config.timing.tick_settle(), Duration::from_millis(50));
    assert_eq!(config.timing.reconnect_interval(), Duration::from_millis(200));
    assert_eq!(config.rom_origin, 0x8000);
    assert!(config.validate().is_ok());
}

#[test]
fn partial_file_keeps_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{ "serial": {{ "port_name": "/dev/ttyACM0", "parity": "even" }}, "rom_origin": 49152 }}"#
    )?;

    let config = Config::load(file.path())?;
    assert_eq!(config.serial.port_name, "/dev/ttyACM0");
    assert_eq!(config.serial.parity, Parity::Even);
    assert_eq!(config.serial.baud_rate, 9600);
    assert_eq!(config.rom_origin, 0xC000);
    assert_eq!(config.timing, TimingConfig::default());
    Ok(())
}

#[test]
fn missing_file_is_reported_with_its_path() {
    let err = Config::load(Path::new("/definitely/not/here.json")).unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.json"));
}

#[test]
fn malformed_file_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "{{ not json")?;
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::Parse { .. })
    ));
    Ok(())
}

#[test_case(4, false ; "four bits rejected")]
#[test_case(5, true ; "five bits accepted")]
#[test_case(8, true ; "eight bits accepted")]
#[test_case(9, false ; "nine bits rejected")]
fn data_bits_are_range_checked(bits: u8, ok: bool) {
    let mut config = Config::default();
    config.serial.data_bits = bits;
    assert_eq!(config.validate().is_ok(), ok);
}

#[test]
fn zero_timeout_is_rejected() {
    let mut config = Config::default();
    config.timing.response_timeout_ms = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroDuration("response_timeout_ms"))
    ));
}

#[test]
fn no_path_means_defaults() -> Result<(), ConfigError> {
    assert_eq!(Config::load_or_default(None)?, Config::default());
    Ok(())
}
