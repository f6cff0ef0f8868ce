use std::fs;
use std::path::Path;

fn write_minimal_env_template(file: &mut fs::File) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(file, "# pointsd configuration")?;
    writeln!(file)?;
    writeln!(file, "RPC_URL=\"https://mainnet.infura.io/v3/CHANGE_ME\"")?;
    writeln!(file, "START_BLOCK=\"21000000\"")?;
    writeln!(file)?;
    writeln!(
        file,
        "# Comma-separated watch list: name=address or name=address@start_block"
    )?;
    writeln!(
        file,
        "# WATCHED_CONTRACTS=\"USD0++=0x35D8949372D46B7a3D5A56006AE77B215fc69bC0\""
    )?;
    writeln!(file)?;
    writeln!(file, "# LEDGER_DB_PATH=\"./user_balances.db\"")?;
    writeln!(file, "# POOL_DATA_PATH=\"data/pool.json\"")?;
    writeln!(file, "# API_LISTEN_ADDR=\"0.0.0.0:8080\"")?;
    writeln!(file)?;
    writeln!(file, "RUST_LOG=\"info\"")?;
    Ok(())
}

/// Parse one `.env` line into a key/value pair. Comments, blank lines and
/// lines without `=` yield `None`; quotes and trailing inline comments are
/// stripped from the value.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;

    let value_no_comment = value.split('#').next().unwrap_or("").trim();
    let parsed = if value_no_comment.len() >= 2
        && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
            || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
    {
        &value_no_comment[1..value_no_comment.len() - 1]
    } else {
        value_no_comment
    };
    Some((key.trim(), parsed))
}

fn load_dot_env() {
    let path = Path::new(".env");
    if !path.exists() {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read .env: {}", e);
            return;
        }
    };

    for line in content.lines() {
        let Some((key, value)) = parse_env_line(line) else {
            continue;
        };
        // Real environment always wins over .env defaults.
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
    }
}

fn ensure_env_files_exist() {
    let env_example = Path::new(".env.example");
    if !env_example.exists() {
        if let Ok(mut file) = fs::File::create(env_example) {
            let _ = write_minimal_env_template(&mut file);
        }
    }
}

/// Load `.env` defaults and make sure a template exists for operators.
/// Called once, before any configuration is read.
pub fn harden_env_setup() {
    ensure_env_files_exist();
    load_dot_env();
}
