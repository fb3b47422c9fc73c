/// End-to-end checks of the subcommands that work without a board.
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn export_writes_three_images() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("cli")?;
    cmd.current_dir(dir.path()).arg("export").arg("--out").arg("eproms");
    cmd.assert().success().stdout(predicate::str::contains("microcode2.bin"));

    for index in 0..3 {
        let image = std::fs::read(dir.path().join("eproms").join(format!("microcode{index}.bin")))?;
        assert_eq!(image.len(), 256 * 8 * 2 * 16 * 2);
    }
    Ok(())
}

#[test]
fn dump_writes_the_builtin_table() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("table.json");
    Command::cargo_bin("cli")?.arg("dump").arg("--out").arg(&out).assert().success();

    let table: serde_json::Value = serde_json::from_slice(&std::fs::read(&out)?)?;
    let entries = table.as_array().ok_or("not an array")?;
    assert_eq!(entries.len(), 256);
    assert_eq!(entries[0xEA]["name"], "NOP");
    Ok(())
}

#[test]
fn export_uses_a_dumped_table() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let table = dir.path().join("table.json");
    Command::cargo_bin("cli")?.arg("dump").arg("--out").arg(&table).assert().success();

    Command::cargo_bin("cli")?
        .current_dir(dir.path())
        .args(["export", "--out", "."])
        .arg("--table")
        .arg(&table)
        .assert()
        .success();
    assert!(dir.path().join("microcode0.bin").exists());
    Ok(())
}

#[test]
fn export_rejects_a_broken_table() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let table = dir.path().join("table.json");
    std::fs::write(&table, "[]")?;
    Command::cargo_bin("cli")?
        .current_dir(dir.path())
        .arg("export")
        .arg("--table")
        .arg(&table)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load opcode table"));
    Ok(())
}

#[test]
fn run_without_a_rom_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    Command::cargo_bin("cli")?
        .current_dir(dir.path())
        .env_remove("L1_ROM")
        .args(["run", "--port", "/dev/null"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No ROM file given"));
    Ok(())
}

#[test]
fn run_without_a_port_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rom = dir.path().join("rom.bin");
    std::fs::write(&rom, [0xEA; 16])?;
    Command::cargo_bin("cli")?
        .current_dir(dir.path())
        .env_remove("L1_PORT")
        .arg("run")
        .arg("--rom")
        .arg(&rom)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No serial port configured"));
    Ok(())
}

#[test]
fn run_with_a_missing_rom_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    Command::cargo_bin("cli")?
        .current_dir(dir.path())
        .args(["run", "--rom", "missing.bin", "--port", "/dev/null"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load ROM"));
    Ok(())
}

#[test]
fn bad_config_file_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{ "serial": { "data_bits": 9 } }"#)?;
    Command::cargo_bin("cli")?
        .arg("--config")
        .arg(&config)
        .arg("dump")
        .arg("--out")
        .arg(dir.path().join("table.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
    Ok(())
}
