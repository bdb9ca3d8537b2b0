fn main() {
    // The dispatcher and mount lifecycle are only meaningful on Windows; on
    // other hosts the crate still type-checks (for CI and editor tooling)
    // but the `no-mount` feature should be enabled.
    println!("cargo::rustc-check-cfg=cfg(winfsp_core_target_windows)");

    let target_os =
        std::env::var("CARGO_CFG_TARGET_OS").expect("CARGO_CFG_TARGET_OS should be set");
    if target_os == "windows" {
        println!("cargo::rustc-cfg=winfsp_core_target_windows");
    }
}
