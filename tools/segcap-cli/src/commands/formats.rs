//! Report which encoding candidates the platform can produce.

use segcap_capture_engine::select_format;
use segcap_common::config::AppConfig;

pub fn run(config: &AppConfig, synthetic: bool) -> anyhow::Result<()> {
    let backend = super::backend(synthetic)?;
    let encoders = backend.encoders();

    println!("Encoding formats ({} backend)", backend.name());
    println!("{}", "=".repeat(50));
    for candidate in &config.recording.format_candidates {
        let marker = if encoders.is_type_supported(candidate) {
            "[OK]"
        } else {
            "[--]"
        };
        println!("{marker} {candidate}");
    }
    println!();

    match select_format(encoders.as_ref(), &config.recording.format_candidates) {
        Ok(format) => println!("Recording will use: {format}"),
        Err(e) => println!("Recording is not possible: {e}"),
    }
    Ok(())
}
