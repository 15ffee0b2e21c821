//! Check system capabilities.

use segcap_capture_engine::get_backend;
use segcap_platform_linux::{detect_default_camera, detect_display_server, DisplayServer};

pub fn run() -> anyhow::Result<()> {
    println!("SegCap System Check");
    println!("{}", "=".repeat(50));

    match detect_display_server() {
        DisplayServer::Wayland => println!("[OK] Display server: Wayland"),
        DisplayServer::X11 => println!("[OK] Display server: X11"),
        DisplayServer::Unknown => println!("[WARN] Display server: Unknown"),
    }

    match detect_default_camera() {
        Some(camera) => println!("[OK] Camera: {} ({})", camera.label, camera.path.display()),
        None => println!("[WARN] Camera: none found"),
    }

    match get_backend() {
        Ok(backend) => println!("[OK] Capture backend: {}", backend.name()),
        Err(e) => println!("[FAIL] Capture backend: {e}"),
    }

    let capabilities = segcap_platform_linux::permissions::check_capabilities();
    println!();
    segcap_platform_linux::permissions::print_capability_report(&capabilities);

    let all_required_ok = capabilities
        .iter()
        .filter(|c| c.required)
        .all(|c| c.available);

    println!();
    if all_required_ok {
        println!("All required capabilities are available. SegCap is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
