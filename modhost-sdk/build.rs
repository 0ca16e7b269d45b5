use std::env;

fn main() {
    // Module ABI version: bump when breaking changes to the module ABI occur.
    // An explicit `MODHOST_SDK_API_VERSION` wins; otherwise the crate major version is used.
    let api_version = env::var("MODHOST_SDK_API_VERSION").unwrap_or_else(|_| {
        env::var("CARGO_PKG_VERSION_MAJOR").unwrap_or_else(|_| "1".to_string())
    });
    println!("cargo:rustc-env=MODHOST_SDK_API_VERSION={}", api_version);
    println!("cargo:rerun-if-env-changed=MODHOST_SDK_API_VERSION");

    let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    println!("cargo:rustc-env=MODHOST_SDK_VERSION={}", pkg_version);
}
