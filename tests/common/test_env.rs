//! Environment for the network tests.
//!
//! A repository-root `.env` is loaded when present so TSA endpoints can be
//! configured without exporting variables. Values already set in the process
//! win.

use std::env;
use std::fs;
use std::path::Path;

/// Load `KEY=VALUE` lines from `<repo>/.env`, skipping blanks and `#`
/// comments. Quotes around values are stripped. Failures are ignored.
pub fn load_dotenv_if_present() {
    let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }
        let value = raw_value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        env::set_var(key, value);
    }
}

/// TSA used by the network tests.
pub fn tsa_url() -> String {
    load_dotenv_if_present();
    env::var("PDF_SIGNER_TEST_TSA").unwrap_or_else(|_| "http://timestamp.digicert.com".to_string())
}
