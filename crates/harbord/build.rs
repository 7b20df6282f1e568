//! Build script: stamp the build date reported by `harbord version`.

use std::env;

use time::OffsetDateTime;
use time::format_description::well_known::Iso8601;

const FALLBACK_DATE: &str = "1970-01-01";

/// Honours `SOURCE_DATE_EPOCH` for reproducible builds, else uses today.
fn build_date() -> String {
    let timestamp = match env::var("SOURCE_DATE_EPOCH") {
        Ok(raw) => match raw.parse::<i64>().ok().and_then(|secs| {
            OffsetDateTime::from_unix_timestamp(secs).ok()
        }) {
            Some(timestamp) => timestamp,
            None => {
                println!(
                    "cargo:warning=Invalid SOURCE_DATE_EPOCH '{raw}'; expected integer seconds \
                     since Unix epoch; falling back to {FALLBACK_DATE}"
                );
                return FALLBACK_DATE.into();
            }
        },
        Err(_) => OffsetDateTime::now_utc(),
    };

    timestamp
        .format(&Iso8601::DATE)
        .unwrap_or_else(|_| FALLBACK_DATE.into())
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rustc-env=HARBORD_BUILD_DATE={}", build_date());
}
